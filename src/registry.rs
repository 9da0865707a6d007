//! Interfaces to a schema registry, and an in-memory registry.
//!
//! Lookups are `async`. The header helpers have default implementations
//! using the standard 5-byte header from [`wire`](crate::wire); registries
//! with another framing override them.

use crate::error::AvrowResult;
use crate::schema::{CanonicalOpts, Schema};
use crate::wire;
use async_trait::async_trait;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

/// A failed registry operation.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// The registry could not be reached.
    #[error("schema registry unavailable: {0}")]
    Unavailable(String),
    /// The registry answered with an error status.
    #[error("schema registry returned status {code}: {message}")]
    Status {
        /// The status code.
        code: u16,
        /// The message returned with it.
        message: String,
    },
    /// No schema is registered under the ID.
    #[error("schema {0} not found")]
    NotFound(i64),
    /// The registry returned something that is not a usable schema.
    #[error("malformed schema registry response: {0}")]
    Malformed(String),
    /// The request was abandoned before it completed.
    #[error("schema registry request cancelled")]
    Cancelled,
}

impl RegistryError {
    /// Reports whether retrying the request may succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            RegistryError::Unavailable(_) => true,
            RegistryError::Status { code, .. } => *code >= 500,
            _ => false,
        }
    }
}

/// Looks up writer schemas by the ID carried in a message.
#[async_trait]
pub trait SchemaGetter: Send + Sync {
    /// Splits a message into schema ID and body.
    fn schema_id<'m>(&self, msg: &'m [u8]) -> Option<(i64, &'m [u8])> {
        wire::decode_schema_id(msg)
    }

    /// Appends a message for schema `id` with the given body to `buf`.
    fn append_with_schema_id(&self, buf: &mut Vec<u8>, body: &[u8], id: i64) -> AvrowResult<()> {
        wire::append_schema_id(buf, id)?;
        buf.extend_from_slice(body);
        Ok(())
    }

    /// Returns the text of the schema registered under `id`.
    async fn schema_for_id(&self, id: i64) -> Result<String, RegistryError>;
}

/// The registry side of encoding: finds the ID of a writer schema.
#[async_trait]
pub trait EncodingRegistry: Send + Sync {
    /// Appends the header for schema `id` to `buf`.
    fn append_schema_id(&self, buf: &mut Vec<u8>, id: i64) -> AvrowResult<()> {
        wire::append_schema_id(buf, id)
    }

    /// Returns the ID of `schema`, registering it if needed.
    async fn id_for_schema(&self, schema: &Schema) -> Result<i64, RegistryError>;
}

/// The registry side of decoding: finds the writer schema of a message.
#[async_trait]
pub trait DecodingRegistry: Send + Sync {
    /// Splits a message into schema ID and body.
    fn decode_schema_id<'m>(&self, msg: &'m [u8]) -> Option<(i64, &'m [u8])> {
        wire::decode_schema_id(msg)
    }

    /// Returns the schema registered under `id`.
    async fn schema_for_id(&self, id: i64) -> Result<Schema, RegistryError>;
}

/// A registry held in memory. IDs are handed out from 1 in registration
/// order; schemas that differ only in formatting, documentation or
/// aliases share an ID.
#[derive(Default)]
pub struct MemRegistry {
    inner: RwLock<MemInner>,
}

#[derive(Default)]
struct MemInner {
    schemas: Vec<Schema>,
    ids: HashMap<String, i64>,
}

impl MemRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        MemRegistry::default()
    }

    /// Registers `schema` and returns its ID.
    pub fn register(&self, schema: &Schema) -> i64 {
        let key = schema.canonical_string(CanonicalOpts::RETAIN_DEFAULTS);
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = inner.ids.get(key) {
            return *id;
        }
        inner.schemas.push(schema.clone());
        let id = inner.schemas.len() as i64;
        inner.ids.insert(key.to_string(), id);
        log::debug!("registered schema {}: {}", id, key);
        id
    }

    /// Returns the schema registered under `id`.
    pub fn get(&self, id: i64) -> Option<Schema> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        usize::try_from(id)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| inner.schemas.get(i))
            .cloned()
    }
}

#[async_trait]
impl SchemaGetter for MemRegistry {
    async fn schema_for_id(&self, id: i64) -> Result<String, RegistryError> {
        self.get(id)
            .map(|s| s.as_str().to_string())
            .ok_or(RegistryError::NotFound(id))
    }
}

#[async_trait]
impl EncodingRegistry for MemRegistry {
    async fn id_for_schema(&self, schema: &Schema) -> Result<i64, RegistryError> {
        Ok(self.register(schema))
    }
}

#[async_trait]
impl DecodingRegistry for MemRegistry {
    async fn schema_for_id(&self, id: i64) -> Result<Schema, RegistryError> {
        self.get(id).ok_or(RegistryError::NotFound(id))
    }
}

#[async_trait]
impl<R: SchemaGetter + ?Sized> SchemaGetter for Arc<R> {
    fn schema_id<'m>(&self, msg: &'m [u8]) -> Option<(i64, &'m [u8])> {
        (**self).schema_id(msg)
    }

    fn append_with_schema_id(&self, buf: &mut Vec<u8>, body: &[u8], id: i64) -> AvrowResult<()> {
        (**self).append_with_schema_id(buf, body, id)
    }

    async fn schema_for_id(&self, id: i64) -> Result<String, RegistryError> {
        (**self).schema_for_id(id).await
    }
}

#[async_trait]
impl<R: EncodingRegistry + ?Sized> EncodingRegistry for Arc<R> {
    fn append_schema_id(&self, buf: &mut Vec<u8>, id: i64) -> AvrowResult<()> {
        (**self).append_schema_id(buf, id)
    }

    async fn id_for_schema(&self, schema: &Schema) -> Result<i64, RegistryError> {
        (**self).id_for_schema(schema).await
    }
}

#[async_trait]
impl<R: DecodingRegistry + ?Sized> DecodingRegistry for Arc<R> {
    fn decode_schema_id<'m>(&self, msg: &'m [u8]) -> Option<(i64, &'m [u8])> {
        (**self).decode_schema_id(msg)
    }

    async fn schema_for_id(&self, id: i64) -> Result<Schema, RegistryError> {
        (**self).schema_for_id(id).await
    }
}

// Parses schema text fetched from a registry.
pub(crate) fn parse_fetched(text: &str) -> Result<Schema, RegistryError> {
    Schema::from_str(text).map_err(|e| RegistryError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_errors() {
        assert!(RegistryError::Unavailable("down".into()).is_retriable());
        assert!(RegistryError::Status {
            code: 503,
            message: "busy".into()
        }
        .is_retriable());
        assert!(!RegistryError::Status {
            code: 404,
            message: "missing".into()
        }
        .is_retriable());
        assert!(!RegistryError::NotFound(3).is_retriable());
        assert!(!RegistryError::Malformed("x".into()).is_retriable());
        assert!(!RegistryError::Cancelled.is_retriable());
    }

    #[tokio::test]
    async fn mem_registry_dedupes() {
        let reg = MemRegistry::new();
        let a = Schema::from_str(r#"{"type":"record","name":"R","fields":[{"name":"a","type":"int"}]}"#)
            .unwrap();
        let a2 = Schema::from_str(
            r#"{"type":"record","name":"R","doc":"same","fields":[{"name":"a","type":"int"}]}"#,
        )
        .unwrap();
        let b = Schema::from_str(r#""string""#).unwrap();
        assert_eq!(reg.id_for_schema(&a).await, Ok(1));
        assert_eq!(reg.id_for_schema(&a2).await, Ok(1));
        assert_eq!(reg.id_for_schema(&b).await, Ok(2));

        let text = SchemaGetter::schema_for_id(&reg, 2).await.unwrap();
        assert_eq!(text, r#""string""#);
        let schema = DecodingRegistry::schema_for_id(&reg, 1).await.unwrap();
        assert_eq!(schema, a);
        assert_eq!(
            DecodingRegistry::schema_for_id(&reg, 3).await,
            Err(RegistryError::NotFound(3))
        );
        assert_eq!(reg.get(0), None);
    }
}
