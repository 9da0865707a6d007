#![allow(dead_code)]

use async_trait::async_trait;
use avrow_typed::{
    AvroType, AvrowResult, DecodingRegistry, EncodingRegistry, MemRegistry, RecordBuilder,
    RegistryError, Schema, Shape,
};
use std::str::FromStr;
use std::sync::Arc;

pub(crate) const TEST_RECORD: &str = r#"{
    "type": "record",
    "name": "TestRecord",
    "fields": [
        {"name": "A", "type": "int", "default": 42},
        {"name": "B", "type": "int"}
    ]
}"#;

#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct TestRecord {
    pub a: i32,
    pub b: i32,
}

impl AvroType for TestRecord {
    fn describe() -> Shape {
        RecordBuilder::<TestRecord>::new("TestRecord")
            .field("A", |r| &r.a, |r| &mut r.a)
            .with_default(|| 42i32)
            .field("B", |r| &r.b, |r| &mut r.b)
            .required()
            .schema(TEST_RECORD)
            .build()
    }
}

pub(crate) fn schema(text: &str) -> Schema {
    Schema::from_str(text).unwrap()
}

pub(crate) fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A registry framing messages with a single-byte schema ID.
#[derive(Default, Clone)]
pub(crate) struct ByteIdRegistry {
    pub inner: Arc<MemRegistry>,
}

#[async_trait]
impl EncodingRegistry for ByteIdRegistry {
    fn append_schema_id(&self, buf: &mut Vec<u8>, id: i64) -> AvrowResult<()> {
        buf.push(id as u8);
        Ok(())
    }

    async fn id_for_schema(&self, schema: &Schema) -> Result<i64, RegistryError> {
        Ok(self.inner.register(schema))
    }
}

#[async_trait]
impl DecodingRegistry for ByteIdRegistry {
    fn decode_schema_id<'m>(&self, msg: &'m [u8]) -> Option<(i64, &'m [u8])> {
        let (id, body) = msg.split_first()?;
        Some((i64::from(*id), body))
    }

    async fn schema_for_id(&self, id: i64) -> Result<Schema, RegistryError> {
        self.inner.get(id).ok_or(RegistryError::NotFound(id))
    }
}
