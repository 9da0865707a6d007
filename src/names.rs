//! The naming environment that maps host types to schemas.
//!
//! A [`Names`] owns the renames applied to inferred schemas and caches the
//! schemas and decode programs derived under them. [`Names::global`] is the
//! environment used by the crate-level [`marshal`](crate::marshal) and
//! [`unmarshal`](crate::unmarshal) functions.

use crate::analyze::{analyze, DecodeProgram};
use crate::cache::ResultCache;
use crate::compiler::compile;
use crate::decode;
use crate::encode;
use crate::error::{AvrowErr, AvrowResult};
use crate::host::{AvroType, HostType};
use crate::infer;
use crate::schema::common::Name;
use crate::schema::{CanonicalOpts, Schema};
use once_cell::sync::Lazy;
use serde_json::{json, Map, Value as JsonValue};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

const PRIMITIVES: [&str; 8] = [
    "null", "boolean", "int", "long", "float", "double", "bytes", "string",
];

const RESERVED: [&str; 6] = ["record", "enum", "array", "map", "fixed", "error"];

#[derive(Debug, Clone)]
struct Rename {
    to: String,
    aliases: Vec<String>,
}

/// Schema naming environment.
///
/// ```rust
/// use avrow_typed::{avro_record, Names};
///
/// #[derive(Default)]
/// struct Reading {
///     value: f64,
/// }
/// avro_record!(Reading { value });
///
/// let names = Names::new()
///     .rename_type::<Reading>("com.example.Reading", &[])
///     .unwrap();
/// let schema = names.type_of::<Reading>().unwrap();
/// assert_eq!(schema.name().as_deref(), Some("com.example.Reading"));
/// ```
///
/// Clones share their caches.
#[derive(Clone)]
pub struct Names {
    renames: Arc<HashMap<String, Rename>>,
    types: Arc<ResultCache<TypeId, Schema>>,
    programs: Arc<ResultCache<(TypeId, String), Arc<DecodeProgram>>>,
}

static GLOBAL: Lazy<Names> = Lazy::new(Names::new);

impl Default for Names {
    fn default() -> Self {
        Names::new()
    }
}

impl Names {
    /// Creates an environment without renames.
    pub fn new() -> Self {
        Names {
            renames: Arc::new(HashMap::new()),
            types: Arc::new(ResultCache::new()),
            programs: Arc::new(ResultCache::new()),
        }
    }

    /// The process-wide environment without renames.
    pub fn global() -> &'static Names {
        &GLOBAL
    }

    /// Returns a copy of this environment in which the named type `old`
    /// is called `new`. The old name and `aliases` become aliases of the
    /// renamed type, so data written under them stays readable.
    pub fn rename(&self, old: &str, new: &str, aliases: &[&str]) -> AvrowResult<Names> {
        let invalid = |why: &str| AvrowErr::InvalidRename(old.to_string(), why.to_string());
        for name in [old, new] {
            if PRIMITIVES.contains(&name) || RESERVED.contains(&name) {
                return Err(invalid("built-in type names cannot be renamed"));
            }
            Name::new(name).map_err(|e| invalid(&e.to_string()))?;
        }
        for alias in aliases {
            Name::new(alias).map_err(|e| invalid(&e.to_string()))?;
        }
        let mut renames = (*self.renames).clone();
        renames.insert(
            old.to_string(),
            Rename {
                to: new.to_string(),
                aliases: aliases.iter().map(|a| a.to_string()).collect(),
            },
        );
        log::debug!("renamed {} to {}", old, new);
        Ok(Names {
            renames: Arc::new(renames),
            ..Names::new()
        })
    }

    /// Like [`rename`](Names::rename), naming the type by the Rust type
    /// that defines it.
    pub fn rename_type<T: AvroType>(&self, new: &str, aliases: &[&str]) -> AvrowResult<Names> {
        let host = T::host_type();
        let old = infer::type_name(&host).ok_or_else(|| {
            AvrowErr::InvalidRename(host.name().to_string(), "not a named type".to_string())
        })?;
        self.rename(&old, new, aliases)
    }

    /// Returns the schema of `T`.
    pub fn type_of<T: AvroType>(&self) -> AvrowResult<Schema> {
        self.schema_of(&T::host_type())
    }

    pub(crate) fn schema_of(&self, host: &HostType) -> AvrowResult<Schema> {
        self.types.get_or_init(host.id(), || {
            let json = infer::schema_json(host)?;
            if self.renames.is_empty() {
                return Schema::from_json(&json);
            }
            let json = self.apply_renames(&json, None);
            Schema::from_json(&json)
        })
    }

    /// Compiles and analyzes the program that decodes `writer` data into
    /// `host`, bypassing the cache.
    pub(crate) fn build_program(
        &self,
        host: &HostType,
        writer: &Schema,
    ) -> AvrowResult<Arc<DecodeProgram>> {
        let reader = self.schema_of(host)?;
        let program = compile(writer, &reader)?;
        log::trace!(
            "program for {} -> {:?}:\n{}",
            writer.canonical_string(CanonicalOpts::NONE),
            host,
            program
        );
        Ok(Arc::new(analyze(program, host, reader)?))
    }

    // Cached per host type and writer parsing canonical form.
    fn program(&self, host: &HostType, writer: &Schema) -> AvrowResult<Arc<DecodeProgram>> {
        let key = (
            host.id(),
            writer.canonical_string(CanonicalOpts::NONE).to_string(),
        );
        self.programs
            .get_or_init(key, || self.build_program(host, writer))
    }

    /// Encodes `x` and returns the bytes with the schema they were written
    /// with.
    pub fn marshal<T: AvroType>(&self, x: &T) -> AvrowResult<(Vec<u8>, Schema)> {
        let mut buf = vec![];
        let schema = self.marshal_append(&mut buf, x)?;
        Ok((buf, schema))
    }

    /// Appends the encoding of `x` to `buf` and returns the schema it was
    /// written with. On failure `buf` is left unchanged.
    pub fn marshal_append<T: AvroType>(&self, buf: &mut Vec<u8>, x: &T) -> AvrowResult<Schema> {
        let host = T::host_type();
        let schema = self.schema_of(&host)?;
        let enc = encode::encoder_for(&host, &schema)?;
        encode::append(&enc, x.as_target(), buf)?;
        Ok(schema)
    }

    /// Decodes `data`, written with `writer`, into `x`, which is reset to
    /// its default first. Returns the schema of `T` that the data was read
    /// as. Fields the writer lacks take their defaults; writer fields `T`
    /// lacks are skipped.
    pub fn unmarshal<T: AvroType>(
        &self,
        data: &[u8],
        x: &mut T,
        writer: &Schema,
    ) -> AvrowResult<Schema> {
        let host = T::host_type();
        let prog = self.program(&host, writer)?;
        *x = T::default();
        decode::run(&prog, data, x.as_target_mut())?;
        Ok(prog.reader.clone())
    }

    // Rewrites the names of named types to full names, applying renames.
    // References are rewritten to match.
    fn apply_renames(&self, json: &JsonValue, namespace: Option<&str>) -> JsonValue {
        match json {
            JsonValue::String(s) if PRIMITIVES.contains(&s.as_str()) => json.clone(),
            JsonValue::String(s) => json!(self.renamed(&Name::qualify(s, namespace))),
            JsonValue::Array(branches) => JsonValue::Array(
                branches
                    .iter()
                    .map(|b| self.apply_renames(b, namespace))
                    .collect(),
            ),
            JsonValue::Object(obj) => self.rename_object(obj, namespace),
            other => other.clone(),
        }
    }

    fn rename_object(&self, obj: &Map<String, JsonValue>, namespace: Option<&str>) -> JsonValue {
        let mut out = obj.clone();
        let ty = obj.get("type").and_then(JsonValue::as_str).unwrap_or_default();
        match ty {
            "record" | "error" | "enum" | "fixed" => {
                let full = match obj.get("name").and_then(JsonValue::as_str) {
                    Some(name) => {
                        let ns = obj
                            .get("namespace")
                            .and_then(JsonValue::as_str)
                            .or(namespace);
                        Name::qualify(name, ns)
                    }
                    None => return JsonValue::Object(out),
                };
                let inner_ns = full.rsplit_once('.').map(|(ns, _)| ns.to_string());
                out.remove("namespace");
                out.insert("name".to_string(), json!(self.renamed(&full)));
                if let Some(rename) = self.renames.get(&full) {
                    let mut aliases: Vec<JsonValue> = obj
                        .get("aliases")
                        .and_then(JsonValue::as_array)
                        .cloned()
                        .unwrap_or_default();
                    aliases.push(json!(full));
                    aliases.extend(rename.aliases.iter().map(|a| json!(a)));
                    out.insert("aliases".to_string(), JsonValue::Array(aliases));
                }
                if let Some(JsonValue::Array(fields)) = obj.get("fields") {
                    let fields = fields
                        .iter()
                        .map(|f| match f {
                            JsonValue::Object(field) => {
                                let mut field = field.clone();
                                if let Some(t) = field.get("type") {
                                    let t = self.apply_renames(t, inner_ns.as_deref());
                                    field.insert("type".to_string(), t);
                                }
                                JsonValue::Object(field)
                            }
                            other => other.clone(),
                        })
                        .collect();
                    out.insert("fields".to_string(), JsonValue::Array(fields));
                }
            }
            "array" => {
                if let Some(items) = obj.get("items") {
                    out.insert("items".to_string(), self.apply_renames(items, namespace));
                }
            }
            "map" => {
                if let Some(values) = obj.get("values") {
                    out.insert("values".to_string(), self.apply_renames(values, namespace));
                }
            }
            _ => {}
        }
        JsonValue::Object(out)
    }

    fn renamed(&self, full: &str) -> String {
        match self.renames.get(full) {
            Some(r) => r.to.clone(),
            None => full.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{avro_record, AvroEnum, RecordBuilder, Shape};
    use pretty_assertions::assert_eq;
    use std::fmt;
    use std::str::FromStr;

    #[derive(Debug, Default, PartialEq)]
    struct Inner {
        x: i32,
    }
    avro_record!(Inner as "a.Inner" { x });

    #[derive(Debug, Default, PartialEq)]
    struct Outer {
        first: Inner,
        second: Option<Inner>,
    }
    avro_record!(Outer as "a.Outer" { first, second });

    #[test]
    fn renames_definitions_and_references() {
        let names = Names::new().rename("a.Inner", "b.Renamed", &["old.Inner"]).unwrap();
        let schema = names.type_of::<Outer>().unwrap();
        let text = schema.canonical_string(CanonicalOpts::NONE);
        assert!(text.contains(r#""name":"b.Renamed""#), "{}", text);
        assert!(text.contains(r#"["null","b.Renamed"]"#), "{}", text);

        // The untouched environment keeps the original names.
        let plain = Names::new().type_of::<Outer>().unwrap();
        assert!(plain
            .canonical_string(CanonicalOpts::NONE)
            .contains(r#""name":"a.Inner""#));
    }

    #[test]
    fn renamed_reader_accepts_old_writer_name() {
        let renamed = Names::new().rename_type::<Inner>("b.Inner", &[]).unwrap();
        let (buf, writer) = Names::new().marshal(&Inner { x: 3 }).unwrap();
        let mut got = Inner::default();
        let reader = renamed.unmarshal(&buf, &mut got, &writer).unwrap();
        assert_eq!(got, Inner { x: 3 });
        assert_eq!(reader.name().as_deref(), Some("b.Inner"));
    }

    #[test]
    fn builtin_names_cannot_be_renamed() {
        assert!(matches!(
            Names::new().rename("int", "a.Int", &[]),
            Err(AvrowErr::InvalidRename(..))
        ));
        assert!(matches!(
            Names::new().rename("a.Inner", "record", &[]),
            Err(AvrowErr::InvalidRename(..))
        ));
        assert!(matches!(
            Names::new().rename_type::<i32>("a.Int", &[]),
            Err(AvrowErr::InvalidRename(..))
        ));
    }

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Color(i64);

    const RED: Color = Color(0);
    const GREEN: Color = Color(1);

    impl fmt::Display for Color {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self.0 {
                0 => f.write_str("Red"),
                1 => f.write_str("Green"),
                n => write!(f, "Color({})", n),
            }
        }
    }

    impl AvroEnum for Color {
        fn from_ordinal(ordinal: i64) -> Self {
            Color(ordinal)
        }
        fn ordinal(&self) -> i64 {
            self.0
        }
    }

    impl AvroType for Color {
        fn describe() -> Shape {
            Color::shape("Color")
        }
    }

    #[derive(Debug, Default, PartialEq)]
    struct Paint {
        color: Color,
        coats: i64,
    }

    impl AvroType for Paint {
        fn describe() -> Shape {
            RecordBuilder::<Paint>::new("Paint")
                .field("color", |p| &p.color, |p| &mut p.color)
                .field("coats", |p| &p.coats, |p| &mut p.coats)
                .build()
        }
    }

    #[test]
    fn marshal_and_unmarshal() {
        let names = Names::new();
        let p = Paint {
            color: GREEN,
            coats: 2,
        };
        let (buf, schema) = names.marshal(&p).unwrap();
        assert_eq!(buf, vec![2, 4]);
        assert!(schema.as_str().contains(r#""symbols":["Red","Green"]"#));
        let mut back = Paint::default();
        names.unmarshal(&buf, &mut back, &schema).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn unmarshal_resets_the_target() {
        let writer = Schema::from_str(
            r#"{"type":"record","name":"Paint","fields":[{"name":"coats","type":"int"}]}"#,
        )
        .unwrap();
        let mut p = Paint {
            color: GREEN,
            coats: 9,
        };
        Names::global().unmarshal(&[6], &mut p, &writer).unwrap();
        assert_eq!(
            p,
            Paint {
                color: RED,
                coats: 3
            }
        );
    }
}
