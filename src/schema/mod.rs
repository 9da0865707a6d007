//! Contains routines for parsing and validating an Avro schema.
//! Schemas in avro are written as JSON and can be provided as .avsc files
//! or derived from a Rust type (see [`type_of`](crate::type_of)).

pub mod common;
use crate::error::AvrowErr;
mod canonical;
pub mod parser;
pub(crate) use parser::Registry;

use crate::error::AvrowResult;
pub use canonical::{CanonicalOpts, CanonicalSchema};
use common::{Field, Name};
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use serde_json::{self, Value as JsonValue};
use std::fmt::{self, Debug, Display};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Variant {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    Str,
    Record {
        name: Name,
        aliases: Option<Vec<String>>,
        fields: IndexMap<String, Field>,
    },
    Fixed {
        name: Name,
        aliases: Option<Vec<String>>,
        size: usize,
    },
    Enum {
        name: Name,
        aliases: Option<Vec<String>>,
        symbols: Vec<String>,
        default: Option<String>,
    },
    Map {
        values: Box<Variant>,
    },
    Array {
        items: Box<Variant>,
    },
    Union {
        variants: Vec<Variant>,
    },
    Named(String),
    // A logical type annotation over its underlying type.
    Logical {
        logical_type: String,
        precision: Option<u64>,
        scale: Option<u64>,
        base: Box<Variant>,
    },
}

impl Variant {
    /// Strips logical type annotations.
    pub(crate) fn underlying(&self) -> &Variant {
        match self {
            Variant::Logical { base, .. } => base.underlying(),
            other => other,
        }
    }

    pub(crate) fn fullname(&self) -> Option<String> {
        match self.underlying() {
            Variant::Record { name, .. }
            | Variant::Fixed { name, .. }
            | Variant::Enum { name, .. } => Some(name.fullname()),
            Variant::Named(name) => Some(name.clone()),
            _ => None,
        }
    }

    // Unions may not hold two members with the same key.
    pub(crate) fn union_key(&self) -> String {
        match self.underlying() {
            Variant::Null => "null".into(),
            Variant::Boolean => "boolean".into(),
            Variant::Int => "int".into(),
            Variant::Long => "long".into(),
            Variant::Float => "float".into(),
            Variant::Double => "double".into(),
            Variant::Bytes => "bytes".into(),
            Variant::Str => "string".into(),
            Variant::Map { .. } => "map".into(),
            Variant::Array { .. } => "array".into(),
            Variant::Union { .. } => "union".into(),
            named => named.fullname().unwrap_or_default(),
        }
    }
}

/// Represents an avro schema: the parsed definition together with the
/// text it was parsed from. Cloning is cheap.
#[derive(Clone)]
pub struct Schema(Arc<SchemaInner>);

struct SchemaInner {
    text: String,
    // Schema context that has a lookup table to resolve named schema references
    cxt: Registry,
    // typed and stripped version of schema used internally.
    variant: Variant,
    // canonical strings, computed on first use, one per option combination.
    canonical: [OnceCell<String>; 4],
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_string(CanonicalOpts::NONE) == other.canonical_string(CanonicalOpts::NONE)
    }
}

impl Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Schema").field(&self.0.text).finish()
    }
}

impl Display for Schema {
    /// Writes the schema text this schema was parsed from.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.text)
    }
}

impl std::str::FromStr for Schema {
    type Err = AvrowErr;
    /// Parse an avro schema from a JSON string
    /// One can use Rust's raw string syntax (r##""##) to pass schema.
    fn from_str(schema: &str) -> Result<Self, Self::Err> {
        let schema_json: JsonValue =
            serde_json::from_str(schema).map_err(|e| AvrowErr::SchemaParseErr(e.to_string()))?;
        Schema::parse_imp(schema.to_string(), &schema_json)
    }
}

impl Schema {
    /// Parses an avro schema from a JSON schema in a file.
    /// Alternatively, one can use the [`FromStr`](https://doc.rust-lang.org/std/str/trait.FromStr.html)
    /// impl to create the Schema from a JSON string:
    /// ```
    /// use std::str::FromStr;
    /// use avrow_typed::Schema;
    ///
    /// let schema = Schema::from_str(r##""null""##).unwrap();
    /// ```
    pub fn from_path<P: AsRef<Path> + Debug>(path: P) -> AvrowResult<Self> {
        let schema_file = OpenOptions::new()
            .read(true)
            .open(&path)
            .map_err(|e| AvrowErr::SchemaParseErr(e.to_string()))?;
        let value: JsonValue = serde_json::from_reader(schema_file)
            .map_err(|e| AvrowErr::SchemaParseErr(e.to_string()))?;
        Schema::parse_imp(value.to_string(), &value)
    }

    pub(crate) fn from_json(value: &JsonValue) -> AvrowResult<Self> {
        Schema::parse_imp(value.to_string(), value)
    }

    fn parse_imp(text: String, schema_json: &JsonValue) -> AvrowResult<Self> {
        let mut parser = Registry::new();
        let variant = parser.parse_schema(schema_json, None)?;
        Ok(Schema(Arc::new(SchemaInner {
            text,
            cxt: parser,
            variant,
            canonical: Default::default(),
        })))
    }

    pub(crate) fn variant(&self) -> &Variant {
        &self.0.variant
    }

    pub(crate) fn cxt(&self) -> &Registry {
        &self.0.cxt
    }

    /// Returns the schema text this schema was parsed from.
    pub fn as_str(&self) -> &str {
        &self.0.text
    }

    /// Returns the fully qualified name of the schema if it is a named
    /// definition (record, enum or fixed).
    pub fn name(&self) -> Option<String> {
        match self.0.variant.underlying() {
            Variant::Named(_) => None,
            v => v.fullname(),
        }
    }

    /// Returns the canonical string form of the schema. With
    /// [`CanonicalOpts::NONE`] this is the Avro
    /// [parsing canonical form](https://avro.apache.org/docs/current/spec.html#Parsing+Canonical+Form+for+Schemas);
    /// the options keep field defaults and logical type annotations, which
    /// matter when comparing schemas held by a registry.
    ///
    /// ```rust
    /// use avrow_typed::{CanonicalOpts, Schema};
    /// use std::str::FromStr;
    ///
    /// let schema = Schema::from_str(r##"
    ///     {
    ///         "type": "record",
    ///         "name": "LongList",
    ///         "aliases": ["LinkedLongs"],
    ///         "fields" : [
    ///             {"name": "value", "type": "long", "default": 0},
    ///             {"name": "next", "type": ["null", "LongList"]
    ///         }]
    ///     }
    /// "##).unwrap();
    ///
    /// assert_eq!(
    ///     schema.canonical_string(CanonicalOpts::RETAIN_DEFAULTS),
    ///     r#"{"name":"LongList","type":"record","fields":[{"name":"value","type":"long","default":0},{"name":"next","type":["null","LongList"]}]}"#
    /// );
    /// ```
    pub fn canonical_string(&self, opts: CanonicalOpts) -> &str {
        let opts = opts.masked();
        self.0.canonical[opts.bits() as usize]
            .get_or_init(|| canonical::canonical_string(&self.0.variant, &self.0.cxt, opts))
    }

    /// Returns the parsing canonical form of the schema, which carries the
    /// fingerprinting methods.
    pub fn canonical_form(&self) -> CanonicalSchema {
        CanonicalSchema(self.canonical_string(CanonicalOpts::NONE).to_string())
    }
}
