//! Navigable description of a host type's record, union, array and map
//! structure, consulted by the program analyzer.

use crate::cache::ResultCache;
use crate::error::{AvrowErr, AvrowResult};
use crate::host::{DefaultFn, HostType, RecordDesc, ShapeKind, UnionVariant};
use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;
use std::any::TypeId;
use std::sync::Arc;

/// One node of the tree. Entries are filled one level deep: the entries of
/// a record are its fields in schema order and the entries of a union are
/// its alternatives. A field whose type is a union carries the alternatives
/// as its own entries.
#[derive(Clone, Default)]
pub(crate) struct TypeInfo {
    // Absent for the null alternative of a union.
    pub(crate) host: Option<HostType>,
    // For a record field, its slot among the builder's fields.
    pub(crate) index: usize,
    pub(crate) name: String,
    pub(crate) make_default: Option<DefaultFn>,
    pub(crate) is_union: bool,
    pub(crate) entries: Vec<TypeInfo>,
}

static TYPE_INFO: Lazy<ResultCache<TypeId, Arc<TypeInfo>>> = Lazy::new(ResultCache::new);

static NULL_INFO: Lazy<Arc<TypeInfo>> = Lazy::new(|| Arc::new(TypeInfo::default()));

impl TypeInfo {
    /// Returns the tree node for `host`, memoized per type.
    pub(crate) fn for_host(host: &HostType) -> AvrowResult<Arc<TypeInfo>> {
        TYPE_INFO.get_or_init(host.id(), || build(host).map(Arc::new))
    }

    pub(crate) fn null() -> Arc<TypeInfo> {
        NULL_INFO.clone()
    }

    /// Expands an entry into a full node: union-typed fields already carry
    /// their alternatives, anything else is looked up by type.
    pub(crate) fn expand(entry: &TypeInfo) -> AvrowResult<Arc<TypeInfo>> {
        match &entry.host {
            None => Ok(TypeInfo::null()),
            Some(_) if entry.is_union => Ok(Arc::new(entry.clone())),
            Some(host) => TypeInfo::for_host(host),
        }
    }

    fn alternative(index: usize, host: Option<HostType>) -> TypeInfo {
        TypeInfo {
            host,
            index,
            ..TypeInfo::default()
        }
    }
}

fn build(host: &HostType) -> AvrowResult<TypeInfo> {
    let mut info = TypeInfo {
        host: Some(host.clone()),
        ..TypeInfo::default()
    };
    match host.shape() {
        ShapeKind::Record(rec) => {
            info.name = rec.name.clone();
            info.entries = schema_order(host, rec)?
                .into_iter()
                .map(|i| field_info(host, rec, i))
                .collect::<AvrowResult<_>>()?;
        }
        ShapeKind::Nullable(_) | ShapeKind::Union(_) => {
            info.is_union = true;
            info.entries = inferred_alternatives(host)?;
        }
        ShapeKind::Map(map) => {
            let key = (map.key)();
            if !key.is_string() {
                return Err(AvrowErr::NonStringMapKey(key.name().to_string()));
            }
        }
        ShapeKind::Unsupported => {
            return Err(AvrowErr::UnsupportedType(host.name().to_string()));
        }
        ShapeKind::Leaf(..) | ShapeKind::Enum(_) | ShapeKind::Array(_) => {}
    }
    Ok(info)
}

// The builder slots of a record's fields in the order its schema lists
// them. A declared schema may list them in another order than the builder.
fn schema_order(host: &HostType, rec: &RecordDesc) -> AvrowResult<Vec<usize>> {
    let text = match &rec.info.schema {
        Some(text) => text,
        None => return Ok((0..rec.fields.len()).collect()),
    };
    let declared: JsonValue =
        serde_json::from_str(text).map_err(|e| AvrowErr::SchemaParseErr(e.to_string()))?;
    let fields = declared
        .get("fields")
        .and_then(JsonValue::as_array)
        .ok_or(AvrowErr::ExpectedFieldsJsonArray)?;
    fields
        .iter()
        .map(|f| {
            let name = f
                .get("name")
                .and_then(JsonValue::as_str)
                .ok_or(AvrowErr::RecordNameNotFound)?;
            rec.fields
                .iter()
                .position(|d| d.name == name)
                .ok_or_else(|| {
                    AvrowErr::UnsupportedType(format!(
                        "schema of {} declares field {:?} it does not have",
                        host.name(),
                        name
                    ))
                })
        })
        .collect()
}

fn inferred_alternatives(host: &HostType) -> AvrowResult<Vec<TypeInfo>> {
    match host.shape() {
        ShapeKind::Nullable(n) => {
            let elem = (n.elem)();
            if matches!(elem.shape(), ShapeKind::Nullable(_) | ShapeKind::Union(_)) {
                return Err(AvrowErr::NestedOption(host.name().to_string()));
            }
            Ok(vec![
                TypeInfo::alternative(0, None),
                TypeInfo::alternative(1, Some(elem)),
            ])
        }
        ShapeKind::Union(u) => {
            if u.variants.is_empty() {
                return Err(AvrowErr::EmptyUnion(u.name.to_string()));
            }
            Ok(u.variants
                .iter()
                .enumerate()
                .map(|(i, v)| TypeInfo::alternative(i, v.host()))
                .collect())
        }
        _ => Ok(vec![]),
    }
}

fn field_info(record: &HostType, rec: &RecordDesc, i: usize) -> AvrowResult<TypeInfo> {
    let field = &rec.fields[i];
    if field.embedded {
        return Err(AvrowErr::AnonymousField {
            ty: record.name().to_string(),
            field: field.name.clone(),
        });
    }
    let host = (field.host)();
    let required = rec.info.is_required(i);
    let make_default = match rec.info.default_fn(i) {
        Some(make) => Some(make.clone()),
        None if !required => {
            let zero = host.clone();
            let make: DefaultFn = Arc::new(move || zero.new_value());
            Some(make)
        }
        None => None,
    };
    let mut info = TypeInfo {
        host: Some(host.clone()),
        index: i,
        name: field.name.clone(),
        make_default,
        ..TypeInfo::default()
    };
    if let Some(alternatives) = rec.info.alternatives(i) {
        info.is_union = true;
        info.entries = declared_alternatives(record, &field.name, &host, alternatives)?;
    } else if matches!(host.shape(), ShapeKind::Nullable(_) | ShapeKind::Union(_)) {
        info.is_union = true;
        info.entries = inferred_alternatives(&host)?;
    }
    Ok(info)
}

fn declared_alternatives(
    record: &HostType,
    field: &str,
    host: &HostType,
    alternatives: &[Option<fn() -> HostType>],
) -> AvrowResult<Vec<TypeInfo>> {
    let alts: Vec<Option<HostType>> = alternatives.iter().map(|a| a.map(|f| f())).collect();
    let bad_option = || AvrowErr::OptionWithoutNullUnion {
        ty: record.name().to_string(),
        field: field.to_string(),
    };
    match host.shape() {
        ShapeKind::Nullable(n) => {
            let elem = (n.elem)();
            let nulls = alts.iter().filter(|a| a.is_none()).count();
            let values = alts.iter().filter(|a| a.as_ref() == Some(&elem)).count();
            if alts.len() != 2 || nulls != 1 || values != 1 {
                return Err(bad_option());
            }
        }
        ShapeKind::Union(u) => {
            if alts.is_empty() {
                return Err(AvrowErr::EmptyUnion(u.name.to_string()));
            }
            for alt in &alts {
                let known = u.variants.iter().any(|v| match (v, alt) {
                    (UnionVariant::Null { .. }, None) => true,
                    (UnionVariant::Value { .. }, Some(h)) => v.host().as_ref() == Some(h),
                    _ => false,
                });
                if !known {
                    return Err(AvrowErr::UnsupportedType(format!(
                        "{} is not an alternative of {}",
                        alt.as_ref().map_or("null", |h| h.name()),
                        u.name
                    )));
                }
            }
        }
        _ => return Err(AvrowErr::UnsupportedType(format!(
            "field {:?} of {} lists union alternatives but is not an option or union",
            field,
            record.name()
        ))),
    }
    Ok(alts
        .into_iter()
        .enumerate()
        .map(|(i, h)| TypeInfo::alternative(i, h))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::alternative;
    use crate::{AvroType, RecordBuilder, Shape};
    use std::collections::HashMap;

    #[derive(Default)]
    struct Node {
        value: i64,
        next: Option<Box<Node>>,
        tags: Vec<String>,
    }

    impl AvroType for Node {
        fn describe() -> Shape {
            RecordBuilder::<Node>::new("Node")
                .field("value", |n| &n.value, |n| &mut n.value)
                .required()
                .field("next", |n| &n.next, |n| &mut n.next)
                .field("tags", |n| &n.tags, |n| &mut n.tags)
                .build()
        }
    }

    #[derive(Default)]
    struct Flipped {
        maybe: Option<i32>,
    }

    impl AvroType for Flipped {
        fn describe() -> Shape {
            RecordBuilder::<Flipped>::new("Flipped")
                .field("maybe", |f| &f.maybe, |f| &mut f.maybe)
                .alternatives(vec![alternative::<i32>(), None])
                .build()
        }
    }

    #[derive(Default)]
    struct BadOption {
        maybe: Option<i32>,
    }

    impl AvroType for BadOption {
        fn describe() -> Shape {
            RecordBuilder::<BadOption>::new("BadOption")
                .field("maybe", |f| &f.maybe, |f| &mut f.maybe)
                .alternatives(vec![None, None])
                .build()
        }
    }

    #[test]
    fn recursive_record() {
        let info = TypeInfo::for_host(&HostType::of::<Node>()).unwrap();
        assert_eq!(info.entries.len(), 3);
        let value = &info.entries[0];
        assert_eq!((value.index, value.name.as_str()), (0, "value"));
        assert!(value.make_default.is_none());

        let next = &info.entries[1];
        assert!(next.is_union);
        assert!(next.make_default.is_some());
        assert!(next.entries[0].host.is_none());
        assert_eq!(next.entries[1].host, Some(HostType::of::<Node>()));

        let tags = TypeInfo::expand(&info.entries[2]).unwrap();
        assert!(!tags.is_union);
        assert_eq!(tags.host, Some(HostType::of::<Vec<String>>()));
    }

    #[derive(Default)]
    struct Reordered {
        a: i32,
        b: String,
    }

    impl AvroType for Reordered {
        fn describe() -> Shape {
            RecordBuilder::<Reordered>::new("Reordered")
                .field("a", |r| &r.a, |r| &mut r.a)
                .field("b", |r| &r.b, |r| &mut r.b)
                .schema(
                    r#"{"type":"record","name":"Reordered","fields":[
                        {"name":"b","type":"string"},{"name":"a","type":"int"}]}"#,
                )
                .build()
        }
    }

    #[test]
    fn declared_field_order() {
        let info = TypeInfo::for_host(&HostType::of::<Reordered>()).unwrap();
        let slots: Vec<_> = info
            .entries
            .iter()
            .map(|e| (e.name.as_str(), e.index))
            .collect();
        assert_eq!(slots, [("b", 1), ("a", 0)]);
    }

    #[test]
    fn declared_alternative_order() {
        let info = TypeInfo::for_host(&HostType::of::<Flipped>()).unwrap();
        let maybe = &info.entries[0];
        assert_eq!(maybe.entries[0].host, Some(HostType::of::<i32>()));
        assert!(maybe.entries[1].host.is_none());
    }

    #[test]
    fn option_metadata_needs_null_and_value() {
        assert!(matches!(
            TypeInfo::for_host(&HostType::of::<BadOption>()),
            Err(AvrowErr::OptionWithoutNullUnion { .. })
        ));
    }

    #[test]
    fn rejected_shapes() {
        assert!(matches!(
            TypeInfo::for_host(&HostType::of::<HashMap<i32, String>>()),
            Err(AvrowErr::NonStringMapKey(_))
        ));
        assert!(matches!(
            TypeInfo::for_host(&HostType::of::<Option<Option<i32>>>()),
            Err(AvrowErr::NestedOption(_))
        ));
        assert!(matches!(
            TypeInfo::for_host(&HostType::of::<u64>()),
            Err(AvrowErr::UnsupportedType(_))
        ));
    }
}
