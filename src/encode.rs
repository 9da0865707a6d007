//! Encodes host values in the binary encoding of their own schema.
//!
//! An encoder tree is built once per host type by walking the host's shape
//! alongside its schema, and cached for the life of the process.

use crate::cache::ResultCache;
use crate::config::{MAX_DEPTH, SORT_MAP_KEYS};
use crate::error::{AvrowErr, AvrowResult};
use crate::host::{HostType, LeafKind, PredFn, RefFn, Scalar, ShapeKind, UnionVariant};
use crate::schema::{Registry, Schema, Variant};
use crate::typeinfo::TypeInfo;
use crate::util::{encode_bool, encode_bytes, encode_double, encode_float, encode_long, encode_raw_bytes};
use once_cell::sync::{Lazy, OnceCell};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

type ReadFn = fn(&dyn Any) -> Option<Scalar<'_>>;

pub(crate) enum Encoder {
    // `kind` is the form written, which may promote the host's own.
    Leaf {
        kind: LeafKind,
        read: ReadFn,
    },
    Enum {
        read: ReadFn,
        count: usize,
    },
    // Fields in schema order.
    Record(Vec<(RefFn, Encoder)>),
    Nullable {
        null_index: i64,
        value_index: i64,
        get: fn(&dyn Any) -> Option<Option<&dyn Any>>,
        value: Box<Encoder>,
    },
    Union(Vec<Arm>),
    Array {
        len: fn(&dyn Any) -> Option<usize>,
        get: fn(&dyn Any, usize) -> Option<&dyn Any>,
        elem: Box<Encoder>,
    },
    Map {
        entries: fn(&dyn Any) -> Option<Vec<(&dyn Any, &dyn Any)>>,
        key: ReadFn,
        elem: Box<Encoder>,
    },
    // A record reached again while it was being built.
    Deferred(Arc<OnceCell<Arc<Encoder>>>),
}

pub(crate) enum Arm {
    Null { index: i64, is: PredFn },
    Value { index: i64, get: RefFn, value: Encoder },
}

static ENCODERS: Lazy<ResultCache<TypeId, Arc<Encoder>>> = Lazy::new(ResultCache::new);

/// Returns the encoder for `host`, whose schema is `schema`.
pub(crate) fn encoder_for(host: &HostType, schema: &Schema) -> AvrowResult<Arc<Encoder>> {
    ENCODERS.get_or_init(host.id(), || {
        let mut b = Builder {
            cxt: schema.cxt(),
            building: HashMap::new(),
        };
        b.build(host, schema.variant(), None).map(Arc::new)
    })
}

/// Appends the encoding of `v` to `buf`. On failure `buf` is left as it was.
pub(crate) fn append(enc: &Encoder, v: &dyn Any, buf: &mut Vec<u8>) -> AvrowResult<()> {
    let start = buf.len();
    let res = encode(enc, v, buf, 0);
    if res.is_err() {
        buf.truncate(start);
    }
    res
}

struct Builder<'s> {
    cxt: &'s Registry,
    building: HashMap<TypeId, Arc<OnceCell<Arc<Encoder>>>>,
}

fn unsupported(host: &HostType, schema: &Variant) -> AvrowErr {
    AvrowErr::EncodeFailed(format!(
        "cannot encode {} as {}",
        host.name(),
        schema.union_key()
    ))
}

impl<'s> Builder<'s> {
    // `alternatives` orders the members of a union-typed record field.
    fn build(
        &mut self,
        host: &HostType,
        schema: &'s Variant,
        alternatives: Option<&[TypeInfo]>,
    ) -> AvrowResult<Encoder> {
        let schema = self.cxt.resolve(schema)?;
        Ok(match host.shape() {
            ShapeKind::Leaf(kind, ops) => Encoder::Leaf {
                kind: written_as(*kind, schema).ok_or_else(|| unsupported(host, schema))?,
                read: ops.read,
            },
            ShapeKind::Enum(e) => match schema {
                Variant::Enum { symbols, .. } => Encoder::Enum {
                    read: e.ops.read,
                    count: symbols.len().min(e.symbols.len()),
                },
                _ => return Err(unsupported(host, schema)),
            },
            ShapeKind::Record(rec) => return self.record(host, rec, schema),
            ShapeKind::Nullable(n) => {
                let variants = match schema {
                    Variant::Union { variants } => variants,
                    _ => return Err(unsupported(host, schema)),
                };
                let info;
                let alts = match alternatives {
                    Some(a) => a,
                    None => {
                        info = TypeInfo::for_host(host)?;
                        &info.entries[..]
                    }
                };
                let null_index = alts
                    .iter()
                    .position(|a| a.host.is_none())
                    .ok_or_else(|| unsupported(host, schema))?;
                let value_index = 1 - null_index;
                let value_schema = variants
                    .get(value_index)
                    .ok_or_else(|| unsupported(host, schema))?;
                Encoder::Nullable {
                    null_index: null_index as i64,
                    value_index: value_index as i64,
                    get: n.get,
                    value: Box::new(self.build(&(n.elem)(), value_schema, None)?),
                }
            }
            ShapeKind::Union(u) => {
                let variants = match schema {
                    Variant::Union { variants } => variants,
                    _ => return Err(unsupported(host, schema)),
                };
                let info;
                let alts = match alternatives {
                    Some(a) => a,
                    None => {
                        info = TypeInfo::for_host(host)?;
                        &info.entries[..]
                    }
                };
                let mut arms = Vec::with_capacity(alts.len());
                for (index, alt) in alts.iter().enumerate() {
                    let branch = variants
                        .get(index)
                        .ok_or_else(|| unsupported(host, schema))?;
                    let variant = u.variants.iter().find(|v| v.host() == alt.host);
                    arms.push(match (variant, &alt.host) {
                        (Some(UnionVariant::Null { is, .. }), None) => Arm::Null {
                            index: index as i64,
                            is: is.clone(),
                        },
                        (Some(UnionVariant::Value { get, .. }), Some(h)) => Arm::Value {
                            index: index as i64,
                            get: get.clone(),
                            value: self.build(h, branch, None)?,
                        },
                        _ => return Err(unsupported(host, schema)),
                    });
                }
                Encoder::Union(arms)
            }
            ShapeKind::Array(a) => match schema {
                Variant::Array { items } => Encoder::Array {
                    len: a.len,
                    get: a.get,
                    elem: Box::new(self.build(&(a.elem)(), items, None)?),
                },
                _ => return Err(unsupported(host, schema)),
            },
            ShapeKind::Map(m) => {
                let key = (m.key)();
                let key_read = match (key.is_string(), key.leaf_ops()) {
                    (true, Some(ops)) => ops.read,
                    _ => return Err(AvrowErr::NonStringMapKey(key.name().to_string())),
                };
                match schema {
                    Variant::Map { values } => Encoder::Map {
                        entries: m.entries,
                        key: key_read,
                        elem: Box::new(self.build(&(m.elem)(), values, None)?),
                    },
                    _ => return Err(unsupported(host, schema)),
                }
            }
            ShapeKind::Unsupported => return Err(AvrowErr::UnsupportedType(host.name().to_string())),
        })
    }

    fn record(
        &mut self,
        host: &HostType,
        rec: &crate::host::RecordDesc,
        schema: &'s Variant,
    ) -> AvrowResult<Encoder> {
        if let Some(cell) = self.building.get(&host.id()) {
            return Ok(Encoder::Deferred(cell.clone()));
        }
        let fields = match schema {
            Variant::Record { fields, .. } => fields,
            _ => return Err(unsupported(host, schema)),
        };
        let cell = Arc::new(OnceCell::new());
        self.building.insert(host.id(), cell.clone());
        let info = TypeInfo::for_host(host)?;

        let mut encoders = Vec::with_capacity(fields.len());
        for (name, field) in fields {
            let entry = info
                .entries
                .iter()
                .find(|e| e.name == *name)
                .ok_or_else(|| {
                    AvrowErr::EncodeFailed(format!("{} has no field {:?}", host.name(), name))
                })?;
            let alts = if entry.is_union {
                Some(&entry.entries[..])
            } else {
                None
            };
            let desc = &rec.fields[entry.index];
            encoders.push((
                desc.get.clone(),
                self.build(&(desc.host)(), &field.ty, alts)?,
            ));
        }
        self.building.remove(&host.id());

        let enc = Encoder::Record(encoders);
        if Arc::strong_count(&cell) == 1 {
            return Ok(enc);
        }
        // Referenced from inside itself: hand out the shared node.
        let _ = cell.set(Arc::new(enc));
        Ok(Encoder::Deferred(cell))
    }
}

// The form a `kind` leaf takes under `schema`: its own, or one Avro
// promotes it to.
fn written_as(kind: LeafKind, schema: &Variant) -> Option<LeafKind> {
    use LeafKind as L;
    Some(match (kind, schema) {
        (L::Null, Variant::Null) => L::Null,
        (L::Boolean, Variant::Boolean) => L::Boolean,
        (L::Int, Variant::Int) => L::Int,
        (L::Int | L::Long | L::TimestampMicros, Variant::Long) => L::Long,
        (L::Int | L::Long | L::TimestampMicros | L::Float, Variant::Float) => L::Float,
        (L::Int | L::Long | L::TimestampMicros | L::Float | L::Double, Variant::Double) => {
            L::Double
        }
        (L::Bytes | L::String | L::Uuid, Variant::Bytes) => L::Bytes,
        (L::Bytes | L::String | L::Uuid, Variant::Str) => L::String,
        (L::Fixed(n), Variant::Fixed { size, .. }) if n == *size => L::Fixed(n),
        _ => return None,
    })
}

fn unreadable(what: &str) -> AvrowErr {
    AvrowErr::EncodeFailed(format!("cannot read {} from value", what))
}

fn encode(enc: &Encoder, v: &dyn Any, buf: &mut Vec<u8>, depth: usize) -> AvrowResult<()> {
    if depth > MAX_DEPTH {
        return Err(AvrowErr::EncodeFailed(format!(
            "value nested deeper than {} levels",
            MAX_DEPTH
        )));
    }
    let depth = depth + 1;
    match enc {
        Encoder::Leaf { kind, read } => {
            let s = read(v).ok_or_else(|| unreadable("scalar"))?;
            encode_scalar(*kind, s, buf)
        }
        Encoder::Enum { read, count } => match read(v) {
            Some(Scalar::Long(n)) if n >= 0 && (n as usize) < *count => {
                encode_long(n, buf);
                Ok(())
            }
            Some(Scalar::Long(n)) => Err(AvrowErr::EncodeFailed(format!(
                "enum ordinal {} out of range",
                n
            ))),
            _ => Err(unreadable("enum")),
        },
        Encoder::Record(fields) => {
            for (get, field) in fields {
                let f = get(v).ok_or_else(|| unreadable("field"))?;
                encode(field, f, buf, depth)?;
            }
            Ok(())
        }
        Encoder::Nullable {
            null_index,
            value_index,
            get,
            value,
        } => match get(v).ok_or_else(|| unreadable("option"))? {
            None => {
                encode_long(*null_index, buf);
                Ok(())
            }
            Some(x) => {
                encode_long(*value_index, buf);
                encode(value, x, buf, depth)
            }
        },
        Encoder::Union(arms) => {
            for arm in arms {
                match arm {
                    Arm::Null { index, is } if is(v) => {
                        encode_long(*index, buf);
                        return Ok(());
                    }
                    Arm::Value { index, get, value } => {
                        if let Some(p) = get(v) {
                            encode_long(*index, buf);
                            return encode(value, p, buf, depth);
                        }
                    }
                    Arm::Null { .. } => {}
                }
            }
            Err(AvrowErr::EncodeFailed(
                "value matches no union alternative".to_string(),
            ))
        }
        Encoder::Array { len, get, elem } => {
            let n = len(v).ok_or_else(|| unreadable("array"))?;
            if n > 0 {
                encode_long(n as i64, buf);
                for i in 0..n {
                    let item = get(v, i).ok_or_else(|| unreadable("array item"))?;
                    encode(elem, item, buf, depth)?;
                }
            }
            encode_long(0, buf);
            Ok(())
        }
        Encoder::Map { entries, key, elem } => {
            let mut items = entries(v)
                .ok_or_else(|| unreadable("map"))?
                .into_iter()
                .map(|(k, item)| match key(k) {
                    Some(Scalar::String(s)) => Ok((s, item)),
                    _ => Err(unreadable("map key")),
                })
                .collect::<AvrowResult<Vec<_>>>()?;
            if SORT_MAP_KEYS {
                items.sort_by(|a, b| a.0.cmp(&b.0));
            }
            if !items.is_empty() {
                encode_long(items.len() as i64, buf);
                for (k, item) in items {
                    encode_bytes(k.as_bytes(), buf);
                    encode(elem, item, buf, depth)?;
                }
            }
            encode_long(0, buf);
            Ok(())
        }
        Encoder::Deferred(cell) => {
            let enc = cell
                .get()
                .ok_or_else(|| AvrowErr::EncodeFailed("recursive encoder not ready".to_string()))?;
            encode(enc, v, buf, depth)
        }
    }
}

fn encode_scalar(kind: LeafKind, s: Scalar<'_>, buf: &mut Vec<u8>) -> AvrowResult<()> {
    match (kind, s) {
        (LeafKind::Null, _) => {}
        (LeafKind::Boolean, Scalar::Boolean(b)) => encode_bool(b, buf),
        (LeafKind::Int | LeafKind::Long, Scalar::Long(n)) => encode_long(n, buf),
        (LeafKind::Float, Scalar::Double(f)) => encode_float(f as f32, buf),
        (LeafKind::Float, Scalar::Long(n)) => encode_float(n as f32, buf),
        (LeafKind::Double, Scalar::Double(f)) => encode_double(f, buf),
        (LeafKind::Double, Scalar::Long(n)) => encode_double(n as f64, buf),
        (LeafKind::Bytes, Scalar::Bytes(b)) => encode_bytes(&b, buf),
        (LeafKind::Bytes | LeafKind::String, Scalar::String(s)) => encode_bytes(s.as_bytes(), buf),
        (LeafKind::String, Scalar::Bytes(b)) => match std::str::from_utf8(&b) {
            Ok(s) => encode_bytes(s.as_bytes(), buf),
            Err(_) => {
                return Err(AvrowErr::EncodeFailed(
                    "bytes written as a string are not UTF-8".to_string(),
                ))
            }
        },
        (LeafKind::Fixed(n), Scalar::Bytes(b)) if b.len() == n => encode_raw_bytes(&b, buf),
        (kind, s) => {
            return Err(AvrowErr::EncodeFailed(format!(
                "cannot encode {:?} as {:?}",
                s, kind
            )))
        }
    }
    Ok(())
}
