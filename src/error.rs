#![allow(missing_docs)]

use crate::registry::RegistryError;
use std::io::ErrorKind;

pub type AvrowResult<T> = Result<T, AvrowErr>;

// Maps an io error raised while pulling bytes off the wire.
#[inline(always)]
pub(crate) fn read_err(e: std::io::Error) -> AvrowErr {
    match e.kind() {
        ErrorKind::UnexpectedEof => AvrowErr::Eof,
        _ => AvrowErr::MalformedVarint,
    }
}

/// Errors returned from avrow
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AvrowErr {
    // Schema parse errors
    #[error("Failed to parse avro schema: {0}")]
    SchemaParseErr(String),
    #[error("Unknown schema, expecting a required `type` field in schema")]
    SchemaParseFailed,
    #[error("Record schema does not a have a required field named `name`")]
    RecordNameNotFound,
    #[error("Record schema does not a have a required field named `type`")]
    RecordTypeNotFound,
    #[error("Expected record field to be a json array")]
    ExpectedFieldsJsonArray,
    #[error("Record's field json schema must be an object")]
    InvalidRecordFieldType,
    #[error("Could not parse name from json value")]
    NameParseFailed,
    #[error("Duplicate definition of named schema {0:?}")]
    DuplicateSchema(String),
    #[error("Duplicate field name {0:?} in record schema")]
    DuplicateField(String),
    #[error("Invalid default value for field {0:?}")]
    DefaultValueParse(String),
    #[error("Unknown field ordering value.")]
    UnknownFieldOrdering,
    #[error("Field ordering value must be a string")]
    InvalidFieldOrdering,
    #[error("Failed to parse symbol from enum's symbols field")]
    EnumSymbolParseErr,
    #[error("Enum schema must contain required `symbols` field")]
    EnumSymbolsMissing,
    #[error("Enum default {0:?} not present in enum schema `symbols` field")]
    EnumSymbolNotPresent(String),
    #[error("Fixed schema `size` field must be a number")]
    FixedSizeNotNumber,
    #[error("Fixed schema `size` field missing")]
    FixedSizeNotFound,
    #[error("Unions cannot have multiple schemas of same type or immediate unions")]
    DuplicateSchemaInUnion,
    #[error("Expected the avro schema to be as one of json string, object or an array")]
    UnknownSchema,
    #[error("Primitve schema must be a string")]
    InvalidPrimitiveSchema,
    #[error("namespaces must either be empty or follow the grammer <name>[(<dot><name>)*")]
    InvalidNamespace,
    #[error("Field name must be [A-Za-z_] and subsequently contain only [A-Za-z0-9_]")]
    InvalidName,

    // Host type and inference errors
    #[error("duplicate schema name {0:?} for distinct types {1} and {2}")]
    DuplicateTypeName(String, String, String),
    #[error("anonymous field {field:?} in {ty} is not supported")]
    AnonymousField { ty: String, field: String },
    #[error("map must have string-like key type, got {0}")]
    NonStringMapKey(String),
    #[error("cannot make Avro schema for {0}")]
    UnsupportedType(String),
    #[error("can only cope with a single level of option nesting, got {0}")]
    NestedOption(String),
    #[error("union type {0} has no alternatives")]
    EmptyUnion(String),
    #[error("union metadata for field {field:?} of {ty} does not describe a two-member null union")]
    OptionWithoutNullUnion { ty: String, field: String },
    #[error("value fields of record types that declare their own schema are not supported ({0})")]
    DeclaredSchemaField(String),
    #[error("cannot rename {0:?}: {1}")]
    InvalidRename(String, String),

    // Resolution and analysis errors
    #[error("Incompatible schemas: {0}")]
    IncompatibleSchemas(String),
    #[error("analysis failed: {0}")]
    AnalysisFailed(String),

    // Decode errors
    #[error("End of input reached")]
    Eof,
    #[error("Malformed variable-length integer")]
    MalformedVarint,
    #[error("Decode failed: {0}")]
    DecodeFailed(String),
    #[error("{0}")]
    ProgramHalted(String),

    // Encode errors
    #[error("Encoding failed: {0}")]
    EncodeFailed(String),

    // Registry and wire errors
    #[error("cannot get schema ID from message")]
    MissingSchemaId,
    #[error("schema ID {0} does not fit in the message header")]
    SchemaIdOutOfRange(i64),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl AvrowErr {
    /// Reports whether this error is a registry cancellation. Cancelled
    /// lookups are never cached.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AvrowErr::Registry(RegistryError::Cancelled))
    }
}
