//! Single-object messages: an encoder that registers the schema of each
//! type it writes, and a decoder that resolves the schema of each message
//! it reads.

use crate::codec::Resolver;
use crate::decode;
use crate::encode;
use crate::error::{AvrowErr, AvrowResult};
use crate::host::AvroType;
use crate::names::Names;
use crate::registry::{DecodingRegistry, EncodingRegistry};
use crate::schema::Schema;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::RwLock;

/// Encodes values prefixed with the registry ID of their type's schema.
pub struct SingleEncoder<R> {
    registry: R,
    names: Names,
    ids: RwLock<HashMap<TypeId, i64>>,
}

impl<R: EncodingRegistry> SingleEncoder<R> {
    /// Creates an encoder naming types with the global environment.
    pub fn new(registry: R) -> Self {
        SingleEncoder::with_names(registry, Names::global().clone())
    }

    /// Creates an encoder naming types with `names`.
    pub fn with_names(registry: R, names: Names) -> Self {
        SingleEncoder {
            registry,
            names,
            ids: RwLock::new(HashMap::new()),
        }
    }

    /// Encodes `x`, registering the schema of `T` on first use.
    pub async fn encode<T: AvroType>(&self, x: &T) -> AvrowResult<Vec<u8>> {
        let id = self.id_of::<T>().await?;
        let mut buf = vec![];
        self.registry.append_schema_id(&mut buf, id)?;
        self.names.marshal_append(&mut buf, x)?;
        Ok(buf)
    }

    /// Checks that values of `T` can be encoded, registering its schema.
    pub async fn check_encode_type<T: AvroType>(&self) -> AvrowResult<()> {
        self.id_of::<T>().await.map(|_| ())
    }

    async fn id_of<T: AvroType>(&self) -> AvrowResult<i64> {
        let key = TypeId::of::<T>();
        let cached = {
            let ids = self.ids.read().unwrap_or_else(|e| e.into_inner());
            ids.get(&key).copied()
        };
        if let Some(id) = cached {
            return Ok(id);
        }
        let host = T::host_type();
        let schema = self.names.schema_of(&host)?;
        encode::encoder_for(&host, &schema)?;
        let id = self.registry.id_for_schema(&schema).await?;
        log::debug!("schema of {:?} registered as {}", host, id);
        self.ids
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, id);
        Ok(id)
    }
}

/// Decodes messages prefixed with a schema ID, resolving each writer
/// schema against the destination type.
pub struct SingleDecoder<R> {
    registry: R,
    resolver: Resolver,
}

impl<R: DecodingRegistry> SingleDecoder<R> {
    /// Creates a decoder naming types with the global environment.
    pub fn new(registry: R) -> Self {
        SingleDecoder::with_names(registry, Names::global().clone())
    }

    /// Creates a decoder naming types with `names`.
    pub fn with_names(registry: R, names: Names) -> Self {
        SingleDecoder {
            registry,
            resolver: Resolver::new(names),
        }
    }

    /// Decodes the message `data` into `x`, which is reset first, and
    /// returns the schema of `T` it was read as.
    pub async fn decode<T: AvroType>(&self, data: &[u8], x: &mut T) -> AvrowResult<Schema> {
        let (id, body) = self
            .registry
            .decode_schema_id(data)
            .ok_or(AvrowErr::MissingSchemaId)?;
        let registry = &self.registry;
        let prog = self
            .resolver
            .program::<T, _, _>(id, || registry.schema_for_id(id))
            .await?;
        *x = T::default();
        decode::run(&prog, body, x.as_target_mut())?;
        Ok(prog.reader.clone())
    }

    /// Forgets failed schema lookups and program builds.
    pub fn clear_failures(&self) {
        self.resolver.clear_failures()
    }
}
