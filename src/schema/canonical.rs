use super::{Registry, Variant};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::ops::BitOr;

// wrap overflow of 0xc15d213aa4d7a795
const EMPTY: i64 = -4513414715797952619;

static FP_TABLE: once_cell::sync::Lazy<[i64; 256]> = {
    use once_cell::sync::Lazy;
    Lazy::new(|| {
        let mut fp_table: [i64; 256] = [0; 256];
        for i in 0..256 {
            let mut fp = i;
            for _ in 0..8 {
                fp = (fp as u64 >> 1) as i64 ^ (EMPTY & -(fp & 1));
            }
            fp_table[i as usize] = fp;
        }
        fp_table
    })
};

/// A bitmask of options for [`Schema::canonical_string`](crate::Schema::canonical_string).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CanonicalOpts(u8);

impl CanonicalOpts {
    /// Plain parsing canonical form.
    pub const NONE: CanonicalOpts = CanonicalOpts(0);
    /// Keep field default values.
    pub const RETAIN_DEFAULTS: CanonicalOpts = CanonicalOpts(1);
    /// Keep `logicalType`, `precision` and `scale` annotations.
    pub const RETAIN_LOGICAL_TYPES: CanonicalOpts = CanonicalOpts(2);
    /// Keep both defaults and logical types.
    pub const RETAIN_ALL: CanonicalOpts = CanonicalOpts(3);

    /// Returns the raw bits of the mask.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Reports whether every option set in `other` is also set in `self`.
    pub fn contains(self, other: CanonicalOpts) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) fn masked(self) -> CanonicalOpts {
        CanonicalOpts(self.0 & Self::RETAIN_ALL.0)
    }
}

impl BitOr for CanonicalOpts {
    type Output = CanonicalOpts;
    fn bitor(self, rhs: Self) -> Self::Output {
        CanonicalOpts(self.0 | rhs.0)
    }
}

/// Represents canonical form of an avro schema. This representation removes irrelevant fields
/// such as docs and aliases in the schema.
/// Fingerprinting methods are available on this instance.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalSchema(pub(crate) String);

impl std::fmt::Display for CanonicalSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl CanonicalSchema {
    #[cfg(feature = "sha2")]
    /// SHA-256 fingerprint of the canonical form.
    pub fn sha256(&self) -> Vec<u8> {
        use shatwo::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(&self.0);
        let result = hasher.finalize();
        result.to_vec()
    }

    #[cfg(feature = "md5")]
    /// MD5 fingerprint of the canonical form.
    pub fn md5(&self) -> Vec<u8> {
        let v = mdfive::compute(self.0.as_bytes());
        v.to_vec()
    }

    /// The 64-bit Rabin fingerprint (CRC-64-AVRO) of the canonical form.
    pub fn rabin64(&self) -> i64 {
        let mut fp: i64 = EMPTY;

        self.0.as_bytes().iter().for_each(|b| {
            let idx = ((fp ^ *b as i64) & 0xff) as usize;
            fp = (fp as u64 >> 8) as i64 ^ FP_TABLE[idx];
        });

        fp
    }
}

// All the attributes that survive canonicalization, in the order the Avro
// specification lists them. Logical type attributes follow `type`.
#[derive(Serialize, Default)]
struct CanonicalFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    ty: Option<JsonValue>,
    #[serde(rename = "logicalType", skip_serializing_if = "Option::is_none")]
    logical_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    precision: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scale: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<Vec<CanonicalFields>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    symbols: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    items: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    values: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    default: Option<JsonValue>,
}

impl CanonicalFields {
    fn of_type(ty: &str) -> Self {
        CanonicalFields {
            ty: Some(JsonValue::String(ty.to_string())),
            ..Default::default()
        }
    }

    fn into_json(self) -> JsonValue {
        // Serializing plain strings, numbers and JSON values cannot fail.
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

struct Canonicalizer<'a> {
    cxt: &'a Registry,
    defined: HashSet<String>,
    opts: CanonicalOpts,
}

pub(crate) fn canonical_string(variant: &Variant, cxt: &Registry, opts: CanonicalOpts) -> String {
    let mut c = Canonicalizer {
        cxt,
        defined: HashSet::new(),
        opts,
    };
    c.canonical_value(variant).to_string()
}

impl<'a> Canonicalizer<'a> {
    fn canonical_value(&mut self, variant: &Variant) -> JsonValue {
        match variant {
            Variant::Null => "null".into(),
            Variant::Boolean => "boolean".into(),
            Variant::Int => "int".into(),
            Variant::Long => "long".into(),
            Variant::Float => "float".into(),
            Variant::Double => "double".into(),
            Variant::Bytes => "bytes".into(),
            Variant::Str => "string".into(),
            Variant::Array { items } => CanonicalFields {
                items: Some(self.canonical_value(items)),
                ..CanonicalFields::of_type("array")
            }
            .into_json(),
            Variant::Map { values } => CanonicalFields {
                values: Some(self.canonical_value(values)),
                ..CanonicalFields::of_type("map")
            }
            .into_json(),
            Variant::Union { variants } => {
                JsonValue::Array(variants.iter().map(|v| self.canonical_value(v)).collect())
            }
            Variant::Named(name) => {
                if self.defined.contains(name) {
                    return JsonValue::String(name.clone());
                }
                match self.cxt.get(name) {
                    Some(Variant::Named(_)) | None => JsonValue::String(name.clone()),
                    Some(def) => self.canonical_value(def),
                }
            }
            Variant::Record { name, fields, .. } => {
                let fullname = name.fullname();
                if !self.defined.insert(fullname.clone()) {
                    return JsonValue::String(fullname);
                }
                let fields = fields
                    .values()
                    .map(|f| CanonicalFields {
                        name: Some(f.name.clone()),
                        ty: Some(self.canonical_value(&f.ty)),
                        default: f
                            .default
                            .clone()
                            .filter(|_| self.opts.contains(CanonicalOpts::RETAIN_DEFAULTS)),
                        ..Default::default()
                    })
                    .collect();
                CanonicalFields {
                    name: Some(fullname),
                    fields: Some(fields),
                    ..CanonicalFields::of_type("record")
                }
                .into_json()
            }
            Variant::Enum { name, symbols, .. } => {
                let fullname = name.fullname();
                if !self.defined.insert(fullname.clone()) {
                    return JsonValue::String(fullname);
                }
                CanonicalFields {
                    name: Some(fullname),
                    symbols: Some(symbols.clone()),
                    ..CanonicalFields::of_type("enum")
                }
                .into_json()
            }
            Variant::Fixed { name, size, .. } => {
                let fullname = name.fullname();
                if !self.defined.insert(fullname.clone()) {
                    return JsonValue::String(fullname);
                }
                CanonicalFields {
                    name: Some(fullname),
                    size: Some(*size),
                    ..CanonicalFields::of_type("fixed")
                }
                .into_json()
            }
            Variant::Logical {
                logical_type,
                precision,
                scale,
                base,
            } => {
                let base = self.canonical_value(base);
                if !self.opts.contains(CanonicalOpts::RETAIN_LOGICAL_TYPES) {
                    return base;
                }
                let scale = scale.filter(|s| *s != 0);
                match base {
                    JsonValue::Object(mut obj) => {
                        // Named bases such as fixed keep their own attributes.
                        let mut out = serde_json::Map::new();
                        for key in ["name", "type"] {
                            if let Some(v) = obj.remove(key) {
                                out.insert(key.to_string(), v);
                            }
                        }
                        out.insert("logicalType".into(), logical_type.clone().into());
                        if let Some(p) = precision {
                            out.insert("precision".into(), (*p).into());
                        }
                        if let Some(s) = scale {
                            out.insert("scale".into(), s.into());
                        }
                        out.extend(obj);
                        JsonValue::Object(out)
                    }
                    base => CanonicalFields {
                        ty: Some(base),
                        logical_type: Some(logical_type.clone()),
                        precision: *precision,
                        scale,
                        ..Default::default()
                    }
                    .into_json(),
                }
            }
        }
    }
}
