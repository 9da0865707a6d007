//! Derives an Avro schema from a host type.

use crate::config::FIXED_NAMESPACE;
use crate::error::{AvrowErr, AvrowResult};
use crate::host::{HostType, LeafKind, RecordDesc, Scalar, ShapeKind, UnionVariant};
use serde_json::{json, Map, Value as JsonValue};
use std::any::{Any, TypeId};
use std::collections::HashMap;

/// Returns the schema of `host` as JSON. Named types are defined at their
/// first use and referred to by name afterwards.
pub(crate) fn schema_json(host: &HostType) -> AvrowResult<JsonValue> {
    Inferrer::default().schema_of(host)
}

/// Returns the full name of the named type `host` would define, if any.
pub(crate) fn type_name(host: &HostType) -> Option<String> {
    match host.shape() {
        ShapeKind::Record(rec) => Some(rec.name.clone()),
        ShapeKind::Enum(e) => Some(e.name.clone()),
        ShapeKind::Leaf(LeafKind::Fixed(n), _) => Some(fixed_name(*n)),
        _ => None,
    }
}

fn fixed_name(size: usize) -> String {
    format!("{}.Fixed{}", FIXED_NAMESPACE, size)
}

#[derive(Default)]
struct Inferrer {
    // Full name of each definition made so far and the type it came from.
    defined: HashMap<String, (TypeId, &'static str)>,
}

impl Inferrer {
    // Records a definition; returns false if `name` is already defined by
    // the same type.
    fn define(&mut self, name: &str, host: &HostType) -> AvrowResult<bool> {
        match self.defined.get(name) {
            Some((id, _)) if *id == host.id() => Ok(false),
            Some((_, other)) => Err(AvrowErr::DuplicateTypeName(
                name.to_string(),
                other.to_string(),
                host.name().to_string(),
            )),
            None => {
                self.defined
                    .insert(name.to_string(), (host.id(), host.name()));
                Ok(true)
            }
        }
    }

    fn schema_of(&mut self, host: &HostType) -> AvrowResult<JsonValue> {
        match host.shape() {
            ShapeKind::Leaf(kind, _) => self.leaf(host, *kind),
            ShapeKind::Enum(e) => {
                if !self.define(&e.name, host)? {
                    return Ok(json!(e.name));
                }
                Ok(json!({"type": "enum", "name": e.name, "symbols": e.symbols}))
            }
            ShapeKind::Array(a) => {
                let items = self.schema_of(&(a.elem)())?;
                Ok(json!({"type": "array", "items": items}))
            }
            ShapeKind::Map(m) => {
                let key = (m.key)();
                if !key.is_string() {
                    return Err(AvrowErr::NonStringMapKey(key.name().to_string()));
                }
                let values = self.schema_of(&(m.elem)())?;
                Ok(json!({"type": "map", "values": values}))
            }
            ShapeKind::Nullable(n) => {
                let elem = (n.elem)();
                if matches!(elem.shape(), ShapeKind::Nullable(_) | ShapeKind::Union(_)) {
                    return Err(AvrowErr::NestedOption(host.name().to_string()));
                }
                Ok(json!(["null", self.schema_of(&elem)?]))
            }
            ShapeKind::Union(u) => {
                if u.variants.is_empty() {
                    return Err(AvrowErr::EmptyUnion(u.name.to_string()));
                }
                let alternatives = u
                    .variants
                    .iter()
                    .map(|v| self.alternative(v.host()))
                    .collect::<AvrowResult<Vec<_>>>()?;
                Ok(JsonValue::Array(alternatives))
            }
            ShapeKind::Record(rec) => self.record(host, rec),
            ShapeKind::Unsupported => Err(AvrowErr::UnsupportedType(host.name().to_string())),
        }
    }

    fn alternative(&mut self, host: Option<HostType>) -> AvrowResult<JsonValue> {
        match host {
            None => Ok(json!("null")),
            Some(h) => self.schema_of(&h),
        }
    }

    fn leaf(&mut self, host: &HostType, kind: LeafKind) -> AvrowResult<JsonValue> {
        Ok(match kind {
            LeafKind::Null => json!("null"),
            LeafKind::Boolean => json!("boolean"),
            LeafKind::Int => json!("int"),
            LeafKind::Long => json!("long"),
            LeafKind::Float => json!("float"),
            LeafKind::Double => json!("double"),
            LeafKind::Bytes => json!("bytes"),
            LeafKind::String => json!("string"),
            LeafKind::TimestampMicros => json!({"type": "long", "logicalType": "timestamp-micros"}),
            LeafKind::Uuid => json!({"type": "string", "logicalType": "uuid"}),
            LeafKind::Fixed(size) => {
                let name = fixed_name(size);
                if !self.define(&name, host)? {
                    return Ok(json!(name));
                }
                json!({"type": "fixed", "name": name, "size": size})
            }
        })
    }

    fn record(&mut self, host: &HostType, rec: &RecordDesc) -> AvrowResult<JsonValue> {
        if let Some(text) = &rec.info.schema {
            let declared: JsonValue = serde_json::from_str(text)
                .map_err(|e| AvrowErr::SchemaParseErr(e.to_string()))?;
            if !self.define(&rec.name, host)? {
                return Ok(json!(rec.name));
            }
            return Ok(declared);
        }
        if !self.define(&rec.name, host)? {
            return Ok(json!(rec.name));
        }
        let mut fields = Vec::with_capacity(rec.fields.len());
        for (i, field) in rec.fields.iter().enumerate() {
            if field.embedded {
                return Err(AvrowErr::AnonymousField {
                    ty: host.name().to_string(),
                    field: field.name.clone(),
                });
            }
            let field_host = (field.host)();
            let ty = match rec.info.alternatives(i) {
                Some(alts) => {
                    let alts = alts
                        .iter()
                        .map(|a| self.alternative(a.map(|f| f())))
                        .collect::<AvrowResult<Vec<_>>>()?;
                    JsonValue::Array(alts)
                }
                None => self.schema_of(&field_host)?,
            };
            let mut f = Map::new();
            f.insert("name".to_string(), json!(field.name));
            f.insert("type".to_string(), ty);
            if !rec.info.is_required(i) {
                let first = rec
                    .info
                    .alternatives(i)
                    .and_then(|alts| alts.first().copied());
                let default = match first {
                    // The default of a union field must match its first alternative.
                    Some(None) => JsonValue::Null,
                    Some(Some(alt)) => zero_json(&alt())?,
                    None => zero_json(&field_host)?,
                };
                f.insert("default".to_string(), default);
            }
            fields.push(JsonValue::Object(f));
        }
        Ok(json!({"type": "record", "name": rec.name, "fields": fields}))
    }
}

/// Returns the JSON default for the zero value of `host`.
pub(crate) fn zero_json(host: &HostType) -> AvrowResult<JsonValue> {
    let zero = host.new_value();
    value_json(host, &*zero)
}

// Converts a value to its JSON default encoding.
fn value_json(host: &HostType, v: &dyn Any) -> AvrowResult<JsonValue> {
    let unreadable = || AvrowErr::UnsupportedType(format!("cannot read value of {}", host.name()));
    match host.shape() {
        ShapeKind::Leaf(_, ops) => Ok(scalar_json((ops.read)(v).ok_or_else(unreadable)?)),
        ShapeKind::Enum(e) => match (e.ops.read)(v) {
            Some(Scalar::Long(n)) => usize::try_from(n)
                .ok()
                .and_then(|i| e.symbols.get(i))
                .map(|s| json!(s))
                .ok_or_else(|| {
                    AvrowErr::UnsupportedType(format!(
                        "{} has no symbol for ordinal {}",
                        host.name(),
                        n
                    ))
                }),
            _ => Err(unreadable()),
        },
        ShapeKind::Array(a) => {
            let elem = (a.elem)();
            let len = (a.len)(v).ok_or_else(unreadable)?;
            (0..len)
                .map(|i| {
                    let item = (a.get)(v, i).ok_or_else(unreadable)?;
                    value_json(&elem, item)
                })
                .collect::<AvrowResult<Vec<_>>>()
                .map(JsonValue::Array)
        }
        ShapeKind::Map(m) => {
            let key = (m.key)();
            let elem = (m.elem)();
            let key_ops = key
                .leaf_ops()
                .ok_or_else(|| AvrowErr::NonStringMapKey(key.name().to_string()))?;
            let mut obj = Map::new();
            for (k, item) in (m.entries)(v).ok_or_else(unreadable)? {
                let k = match (key_ops.read)(k) {
                    Some(Scalar::String(s)) => s.into_owned(),
                    _ => return Err(AvrowErr::NonStringMapKey(key.name().to_string())),
                };
                obj.insert(k, value_json(&elem, item)?);
            }
            Ok(JsonValue::Object(obj))
        }
        // Only null can be represented: it is the first alternative.
        ShapeKind::Nullable(_) => Ok(JsonValue::Null),
        ShapeKind::Union(u) => match u.variants.first() {
            Some(UnionVariant::Null { .. }) => Ok(JsonValue::Null),
            Some(UnionVariant::Value { host, .. }) => zero_json(&host()),
            None => Err(AvrowErr::EmptyUnion(u.name.to_string())),
        },
        ShapeKind::Record(rec) => {
            if rec.info.schema.is_some() {
                return Err(AvrowErr::DeclaredSchemaField(host.name().to_string()));
            }
            let mut obj = Map::new();
            for field in &rec.fields {
                let item = (field.get)(v).ok_or_else(unreadable)?;
                obj.insert(field.name.clone(), value_json(&(field.host)(), item)?);
            }
            Ok(JsonValue::Object(obj))
        }
        ShapeKind::Unsupported => Err(AvrowErr::UnsupportedType(host.name().to_string())),
    }
}

fn scalar_json(s: Scalar<'_>) -> JsonValue {
    match s {
        Scalar::Null => JsonValue::Null,
        Scalar::Boolean(b) => json!(b),
        Scalar::Long(n) => json!(n),
        Scalar::Double(f) => json!(f),
        // Byte strings map each byte to the code point of the same value.
        Scalar::Bytes(b) => JsonValue::String(b.iter().map(|&c| c as char).collect()),
        Scalar::String(s) => JsonValue::String(s.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{avro_record, AvroEnum, AvroType, RecordBuilder, Shape, Timestamp};
    use pretty_assertions::assert_eq;
    use std::fmt;
    use uuid::Uuid;

    #[derive(Default)]
    struct Inner {
        n: i32,
        s: String,
    }
    avro_record!(Inner { n, s });

    #[derive(Default)]
    struct Outer {
        id: i64,
        when: Timestamp,
        key: Uuid,
        hash: [u8; 2],
        inner: Inner,
        list: Vec<i32>,
        maybe: Option<Inner>,
    }

    impl AvroType for Outer {
        fn describe() -> Shape {
            RecordBuilder::<Outer>::new("com.example.Outer")
                .field("id", |o| &o.id, |o| &mut o.id)
                .required()
                .field("when", |o| &o.when, |o| &mut o.when)
                .field("key", |o| &o.key, |o| &mut o.key)
                .field("hash", |o| &o.hash, |o| &mut o.hash)
                .field("inner", |o| &o.inner, |o| &mut o.inner)
                .field("list", |o| &o.list, |o| &mut o.list)
                .field("maybe", |o| &o.maybe, |o| &mut o.maybe)
                .build()
        }
    }

    #[test]
    fn infers_record_with_defaults() {
        let schema = schema_json(&HostType::of::<Outer>()).unwrap();
        let expected = json!({
            "type": "record",
            "name": "com.example.Outer",
            "fields": [
                {"name": "id", "type": "long"},
                {"name": "when", "type": {"type": "long", "logicalType": "timestamp-micros"}, "default": 0},
                {"name": "key", "type": {"type": "string", "logicalType": "uuid"}, "default": ""},
                {"name": "hash", "type": {"type": "fixed", "name": "rust.Fixed2", "size": 2}, "default": "\u{0}\u{0}"},
                {"name": "inner", "type": {
                    "type": "record",
                    "name": "Inner",
                    "fields": [
                        {"name": "n", "type": "int", "default": 0},
                        {"name": "s", "type": "string", "default": ""}
                    ]
                }, "default": {"n": 0, "s": ""}},
                {"name": "list", "type": {"type": "array", "items": "int"}, "default": []},
                {"name": "maybe", "type": ["null", "Inner"], "default": null}
            ]
        });
        assert_eq!(schema, expected);
    }

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Letter(i64);

    impl fmt::Display for Letter {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self.0 {
                0 => f.write_str("x"),
                1 => f.write_str("y"),
                2 => f.write_str("z"),
                n => write!(f, "Letter({})", n),
            }
        }
    }

    impl AvroEnum for Letter {
        fn from_ordinal(ordinal: i64) -> Self {
            Letter(ordinal)
        }
        fn ordinal(&self) -> i64 {
            self.0
        }
    }

    impl AvroType for Letter {
        fn describe() -> Shape {
            Self::shape("Letter")
        }
    }

    #[derive(Default)]
    struct HasLetter {
        letter: Letter,
    }
    avro_record!(HasLetter { letter });

    #[test]
    fn enum_field_defaults_to_zero_symbol() {
        let schema = schema_json(&HostType::of::<HasLetter>()).unwrap();
        assert_eq!(
            schema["fields"][0],
            json!({
                "name": "letter",
                "type": {"type": "enum", "name": "Letter", "symbols": ["x", "y", "z"]},
                "default": "x"
            })
        );
    }

    mod other {
        #[derive(Default)]
        pub(super) struct Inner {
            pub(super) flag: bool,
        }
        crate::avro_record!(Inner { flag });
    }

    #[derive(Default)]
    struct Clash {
        a: Inner,
        b: other::Inner,
    }
    avro_record!(Clash { a, b });

    #[test]
    fn duplicate_names_are_rejected() {
        assert!(matches!(
            schema_json(&HostType::of::<Clash>()),
            Err(AvrowErr::DuplicateTypeName(name, _, _)) if name == "Inner"
        ));
    }

    #[derive(Default)]
    struct Declared {
        a: i32,
    }

    impl AvroType for Declared {
        fn describe() -> Shape {
            RecordBuilder::<Declared>::new("Declared")
                .field("a", |d| &d.a, |d| &mut d.a)
                .schema(r#"{"type":"record","name":"Declared","fields":[{"name":"a","type":"int"}]}"#)
                .build()
        }
    }

    #[derive(Default)]
    struct HoldsDeclared {
        d: Declared,
    }
    avro_record!(HoldsDeclared { d });

    #[test]
    fn declared_schema_wins() {
        let schema = schema_json(&HostType::of::<Declared>()).unwrap();
        assert_eq!(
            schema,
            json!({"type":"record","name":"Declared","fields":[{"name":"a","type":"int"}]})
        );
        assert!(matches!(
            schema_json(&HostType::of::<HoldsDeclared>()),
            Err(AvrowErr::DeclaredSchemaField(_))
        ));
        let d = Declared { a: 1 };
        let h = HoldsDeclared { d };
        assert_eq!(h.d.a, 1);
    }

    #[test]
    fn unsupported_types() {
        assert!(matches!(
            schema_json(&HostType::of::<Vec<u64>>()),
            Err(AvrowErr::UnsupportedType(_))
        ));
        assert_eq!(schema_json(&HostType::of::<Vec<u8>>()).unwrap(), json!("bytes"));
    }
}
