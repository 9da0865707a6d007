//! Message codec over a schema registry: each message carries the ID of
//! the schema it was written with.

use crate::analyze::DecodeProgram;
use crate::cache::{Programs, WriterSchemas};
use crate::decode;
use crate::error::{AvrowErr, AvrowResult};
use crate::host::AvroType;
use crate::names::Names;
use crate::registry::{self, RegistryError, SchemaGetter};
use crate::schema::Schema;
use std::future::Future;
use std::sync::Arc;

/// Writer schemas and decode programs cached per schema ID.
pub(crate) struct Resolver {
    pub(crate) names: Names,
    schemas: WriterSchemas,
    programs: Programs,
}

impl Resolver {
    pub(crate) fn new(names: Names) -> Self {
        Resolver {
            names,
            schemas: WriterSchemas::new(),
            programs: Programs::new(),
        }
    }

    /// Returns the program decoding data of schema `id` into `T`, fetching
    /// the writer schema with `fetch` on first use.
    pub(crate) async fn program<T, F, Fut>(&self, id: i64, fetch: F) -> AvrowResult<Arc<DecodeProgram>>
    where
        T: AvroType,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Schema, RegistryError>>,
    {
        let writer = self
            .schemas
            .get_or_fetch(id, || async move { fetch().await.map_err(AvrowErr::from) })
            .await?;
        let host = T::host_type();
        self.programs
            .get_or_build(&host, id, || self.names.build_program(&host, &writer))
    }

    pub(crate) fn built(&self) -> usize {
        self.programs.built()
    }

    pub(crate) fn clear_failures(&self) {
        self.schemas.clear_failures();
        self.programs.clear_failures();
    }
}

/// Encodes and decodes messages framed with a schema ID, looking writer
/// schemas up through a [`SchemaGetter`].
///
/// Every writer schema is fetched once per codec and every decode program
/// is built once per destination type and schema ID, however many tasks
/// decode concurrently. Failed lookups are remembered until
/// [`clear_failures`](Codec::clear_failures); a lookup abandoned by
/// dropping its future is not.
pub struct Codec<G> {
    getter: G,
    resolver: Resolver,
}

impl<G: SchemaGetter> Codec<G> {
    /// Creates a codec naming types with the global environment.
    pub fn new(getter: G) -> Self {
        Codec::with_names(getter, Names::global().clone())
    }

    /// Creates a codec naming types with `names`.
    pub fn with_names(getter: G, names: Names) -> Self {
        Codec {
            getter,
            resolver: Resolver::new(names),
        }
    }

    /// The schema getter.
    pub fn getter(&self) -> &G {
        &self.getter
    }

    /// Decodes the message `data` into `x`, which is reset first.
    pub async fn decode<T: AvroType>(&self, data: &[u8], x: &mut T) -> AvrowResult<()> {
        let (id, body) = self
            .getter
            .schema_id(data)
            .ok_or(AvrowErr::MissingSchemaId)?;
        let getter = &self.getter;
        let prog = self
            .resolver
            .program::<T, _, _>(id, || async move {
                let text = getter.schema_for_id(id).await?;
                registry::parse_fetched(&text)
            })
            .await?;
        *x = T::default();
        decode::run(&prog, body, x.as_target_mut())
    }

    /// Encodes `x` with the schema of `T` in a message tagged with `id`.
    /// The caller is responsible for `id` naming that schema.
    pub fn encode<T: AvroType>(&self, id: i64, x: &T) -> AvrowResult<Vec<u8>> {
        let (body, _) = self.resolver.names.marshal(x)?;
        let mut buf = Vec::with_capacity(body.len() + crate::config::HEADER_LEN);
        self.getter.append_with_schema_id(&mut buf, &body, id)?;
        Ok(buf)
    }

    /// The number of decode programs this codec has built.
    pub fn programs_built(&self) -> usize {
        self.resolver.built()
    }

    /// Forgets failed schema lookups and program builds so the next
    /// decode tries again.
    pub fn clear_failures(&self) {
        self.resolver.clear_failures()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avro_record;
    use crate::registry::MemRegistry;

    #[derive(Debug, Default, PartialEq)]
    struct Temp {
        celsius: f64,
        site: String,
    }
    avro_record!(Temp { celsius, site });

    #[tokio::test]
    async fn decodes_what_it_encodes() {
        let reg = MemRegistry::new();
        let id = reg.register(&crate::type_of::<Temp>().unwrap());
        let codec = Codec::new(reg);
        let t = Temp {
            celsius: 21.5,
            site: "roof".to_string(),
        };
        let msg = codec.encode(id, &t).unwrap();
        assert_eq!(&msg[..5], &[0, 0, 0, 0, 1]);

        let mut out = Temp::default();
        codec.decode(&msg, &mut out).await.unwrap();
        assert_eq!(out, t);
        codec.decode(&msg, &mut out).await.unwrap();
        assert_eq!(codec.programs_built(), 1);
    }

    #[tokio::test]
    async fn missing_header() {
        let codec = Codec::new(MemRegistry::new());
        let mut out = Temp::default();
        let err = codec.decode(&[1, 2], &mut out).await.unwrap_err();
        assert_eq!(err, AvrowErr::MissingSchemaId);
    }

    #[tokio::test]
    async fn unknown_schema_id() {
        let codec = Codec::new(MemRegistry::new());
        let mut out = Temp::default();
        let err = codec.decode(&[0, 0, 0, 0, 7, 0], &mut out).await.unwrap_err();
        assert_eq!(err, AvrowErr::Registry(RegistryError::NotFound(7)));
    }
}
