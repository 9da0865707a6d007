use super::common::{validate_name, Field, Name};
use super::Variant;
use crate::error::AvrowErr;
use crate::error::AvrowResult;
use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue};
use std::borrow::ToOwned;
use std::collections::HashMap;

// Wraps a { name -> schema } lookup table to aid parsing named references in complex schemas
// During parsing, the value for each key may get updated as a schema discovers
// more information about the schema during parsing.
#[derive(Debug, Clone, Default)]
pub(crate) struct Registry {
    cxt: HashMap<String, Variant>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            cxt: HashMap::new(),
        }
    }

    pub(crate) fn get<'a>(&'a self, name: &str) -> Option<&'a Variant> {
        self.cxt.get(name)
    }

    /// Follows named references and strips logical type annotations.
    pub(crate) fn resolve<'a>(&'a self, variant: &'a Variant) -> AvrowResult<&'a Variant> {
        match variant.underlying() {
            Variant::Named(name) => match self.cxt.get(name) {
                Some(Variant::Named(_)) | None => Err(AvrowErr::SchemaParseErr(format!(
                    "named schema `{}` is not defined",
                    name
                ))),
                Some(def) => Ok(def.underlying()),
            },
            other => Ok(other),
        }
    }

    pub(crate) fn parse_schema(
        &mut self,
        value: &JsonValue,
        enclosing_namespace: Option<&str>,
    ) -> Result<Variant, AvrowErr> {
        match value {
            // Parse a complex schema
            JsonValue::Object(ref schema) => self.parse_object(schema, enclosing_namespace),
            // Parse a primitive schema, could also be a named schema reference
            JsonValue::String(ref schema) => self.parse_primitive(schema, enclosing_namespace),
            // Parse a union schema
            JsonValue::Array(ref schema) => self.parse_union(schema, enclosing_namespace),
            _ => Err(AvrowErr::UnknownSchema),
        }
    }

    fn parse_union(
        &mut self,
        schema: &[JsonValue],
        enclosing_namespace: Option<&str>,
    ) -> Result<Variant, AvrowErr> {
        let mut union_schema: Vec<Variant> = vec![];
        for s in schema {
            let parsed_schema = self.parse_schema(s, enclosing_namespace)?;
            match parsed_schema.underlying() {
                Variant::Union { .. } => {
                    return Err(AvrowErr::DuplicateSchemaInUnion);
                }
                _ => {
                    let key = parsed_schema.union_key();
                    if union_schema.iter().any(|v| v.union_key() == key) {
                        return Err(AvrowErr::DuplicateSchemaInUnion);
                    } else {
                        union_schema.push(parsed_schema);
                    }
                }
            }
        }
        Ok(Variant::Union {
            variants: union_schema,
        })
    }

    /// Parse a `serde_json::Value` representing a primitive Avro type into a `Schema`.
    fn parse_primitive(
        &mut self,
        schema: &str,
        enclosing_namespace: Option<&str>,
    ) -> Result<Variant, AvrowErr> {
        match schema {
            "null" => Ok(Variant::Null),
            "boolean" => Ok(Variant::Boolean),
            "int" => Ok(Variant::Int),
            "long" => Ok(Variant::Long),
            "double" => Ok(Variant::Double),
            "float" => Ok(Variant::Float),
            "bytes" => Ok(Variant::Bytes),
            "string" => Ok(Variant::Str),
            other if !other.is_empty() => {
                let qualified = Name::qualify(other, enclosing_namespace);
                if self.cxt.contains_key(&qualified) {
                    Ok(Variant::Named(qualified))
                } else if self.cxt.contains_key(other) {
                    Ok(Variant::Named(other.to_string()))
                } else {
                    Err(AvrowErr::SchemaParseErr(format!(
                        "named schema `{}` must be defined before use",
                        other
                    )))
                }
            }
            _ => Err(AvrowErr::InvalidPrimitiveSchema),
        }
    }

    fn parse_record_fields(
        &mut self,
        fields: &[serde_json::Value],
        enclosing_namespace: Option<&str>,
    ) -> Result<IndexMap<String, Field>, AvrowErr> {
        let mut fields_parsed = IndexMap::with_capacity(fields.len());
        for field_obj in fields {
            match field_obj {
                JsonValue::Object(o) => {
                    let name = o
                        .get("name")
                        .and_then(|a| a.as_str())
                        .ok_or(AvrowErr::RecordNameNotFound)?;

                    let ty: &JsonValue = o.get("type").ok_or(AvrowErr::RecordTypeNotFound)?;
                    let ty = self.parse_schema(ty, enclosing_namespace)?;

                    let default = match o.get("default") {
                        Some(v) if self.validate_default(v, &ty) => Some(v.clone()),
                        Some(_) => return Err(AvrowErr::DefaultValueParse(name.to_string())),
                        None => None,
                    };

                    if let Some(order) = o.get("order") {
                        check_field_order(order)?;
                    }

                    let aliases = parse_aliases(o.get("aliases"));

                    if fields_parsed.contains_key(name) {
                        return Err(AvrowErr::DuplicateField(name.to_string()));
                    }
                    fields_parsed.insert(
                        name.to_string(),
                        Field::new(name, ty, default, aliases)?,
                    );
                }
                _ => return Err(AvrowErr::InvalidRecordFieldType),
            }
        }

        Ok(fields_parsed)
    }

    // Named types must be unique within a schema.
    fn define(&mut self, name: &Name, def: Variant) -> AvrowResult<()> {
        let fullname = name.fullname();
        match self.cxt.get(&fullname) {
            Some(Variant::Named(_)) | None => {
                self.cxt.insert(fullname, def);
                Ok(())
            }
            Some(_) => Err(AvrowErr::DuplicateSchema(fullname)),
        }
    }

    fn parse_object(
        &mut self,
        value: &Map<String, JsonValue>,
        enclosing_namespace: Option<&str>,
    ) -> Result<Variant, AvrowErr> {
        let base = match value.get("type") {
            Some(JsonValue::String(ref s)) if s == "record" || s == "error" => {
                let rec_name = Name::from_json(value, enclosing_namespace)?;
                let fullname = rec_name.fullname();
                if self.cxt.contains_key(&fullname) {
                    return Err(AvrowErr::DuplicateSchema(fullname));
                }

                // Insert a named reference to support recursive schema definitions.
                self.cxt
                    .insert(fullname.clone(), Variant::Named(fullname.clone()));

                let fields = if let Some(JsonValue::Array(ref fields_vec)) = value.get("fields") {
                    fields_vec
                } else {
                    return Err(AvrowErr::ExpectedFieldsJsonArray);
                };

                // Most tightly enclosing namespace, which is this record's namespace
                let fields = self.parse_record_fields(fields, rec_name.namespace())?;
                let aliases = qualify_aliases(parse_aliases(value.get("aliases")), &rec_name);

                let rec = Variant::Record {
                    name: rec_name.clone(),
                    aliases,
                    fields,
                };
                self.define(&rec_name, rec.clone())?;
                rec
            }
            Some(JsonValue::String(ref s)) if s == "enum" => {
                let name = Name::from_json(value, enclosing_namespace)?;
                let aliases = qualify_aliases(parse_aliases(value.get("aliases")), &name);
                let mut symbols = vec![];

                match value.get("symbols") {
                    Some(JsonValue::Array(sym)) => {
                        for v in sym {
                            let symbol = v.as_str().ok_or(AvrowErr::EnumSymbolParseErr)?;
                            validate_name(0, symbol)?;
                            symbols.push(symbol.to_string());
                        }
                    }
                    Some(_) => return Err(AvrowErr::EnumSymbolParseErr),
                    None => return Err(AvrowErr::EnumSymbolsMissing),
                }

                let default = match value.get("default") {
                    Some(JsonValue::String(d)) if symbols.contains(d) => Some(d.clone()),
                    Some(other) => return Err(AvrowErr::EnumSymbolNotPresent(other.to_string())),
                    None => None,
                };

                let enum_schema = Variant::Enum {
                    name: name.clone(),
                    aliases,
                    symbols,
                    default,
                };
                self.define(&name, enum_schema.clone())?;
                enum_schema
            }
            Some(JsonValue::String(ref s)) if s == "array" => {
                let items_schema = value.get("items").ok_or_else(|| {
                    AvrowErr::SchemaParseErr("Array schema must have `items` field defined".into())
                })?;
                let parsed_items = self.parse_schema(items_schema, enclosing_namespace)?;
                Variant::Array {
                    items: Box::new(parsed_items),
                }
            }
            Some(JsonValue::String(ref s)) if s == "map" => {
                let values_schema = value.get("values").ok_or_else(|| {
                    AvrowErr::SchemaParseErr("Map schema must have `values` field defined".into())
                })?;
                let parsed_values = self.parse_schema(values_schema, enclosing_namespace)?;
                Variant::Map {
                    values: Box::new(parsed_values),
                }
            }
            Some(JsonValue::String(ref s)) if s == "fixed" => {
                let name = Name::from_json(value, enclosing_namespace)?;
                let size = value.get("size").ok_or(AvrowErr::FixedSizeNotFound)?;
                let aliases = qualify_aliases(parse_aliases(value.get("aliases")), &name);

                let fixed_schema = Variant::Fixed {
                    name: name.clone(),
                    aliases,
                    size: size.as_u64().ok_or(AvrowErr::FixedSizeNotNumber)? as usize,
                };
                self.define(&name, fixed_schema.clone())?;
                fixed_schema
            }
            // {"type": <primitive or named reference>} is the same as the bare string.
            Some(JsonValue::String(ref s)) => self.parse_primitive(s, enclosing_namespace)?,
            // {"type": {...}} or {"type": [...]}
            Some(nested @ JsonValue::Object(_)) | Some(nested @ JsonValue::Array(_)) => {
                self.parse_schema(nested, enclosing_namespace)?
            }
            _other => return Err(AvrowErr::SchemaParseFailed),
        };

        Ok(parse_logical(value, base))
    }

    // Reports whether `default` is a valid JSON encoding of a value of schema `ty`.
    fn validate_default(&self, default: &JsonValue, ty: &Variant) -> bool {
        let ty = match ty.underlying() {
            Variant::Named(name) => match self.cxt.get(name) {
                // A recursive reference to a record still under construction.
                Some(Variant::Named(_)) => return default.is_object(),
                Some(def) => def.underlying(),
                None => return false,
            },
            other => other,
        };
        match (default, ty) {
            (d, Variant::Union { variants }) => variants
                .first()
                .map_or(false, |first| self.validate_default(d, first)),
            (JsonValue::Null, Variant::Null) => true,
            (JsonValue::Bool(_), Variant::Boolean) => true,
            (JsonValue::Number(n), Variant::Int) => n
                .as_i64()
                .map_or(false, |n| n >= i32::MIN as i64 && n <= i32::MAX as i64),
            (JsonValue::Number(n), Variant::Long) => n.as_i64().is_some(),
            (JsonValue::Number(_), Variant::Float) | (JsonValue::Number(_), Variant::Double) => {
                true
            }
            (JsonValue::String(_), Variant::Bytes) | (JsonValue::String(_), Variant::Str) => true,
            (JsonValue::String(s), Variant::Fixed { size, .. }) => s.chars().count() == *size,
            (JsonValue::String(s), Variant::Enum { symbols, .. }) => symbols.contains(s),
            (JsonValue::Array(arr), Variant::Array { items }) => {
                arr.iter().all(|v| self.validate_default(v, items))
            }
            (JsonValue::Object(map), Variant::Map { values }) => {
                map.values().all(|v| self.validate_default(v, values))
            }
            (JsonValue::Object(obj), Variant::Record { fields, .. }) => {
                fields.values().all(|f| match obj.get(&f.name) {
                    Some(v) => self.validate_default(v, &f.ty),
                    None => f.has_default(),
                })
            }
            _ => false,
        }
    }
}

// Wraps `base` in a logical type annotation when the object carries one.
fn parse_logical(value: &Map<String, JsonValue>, base: Variant) -> Variant {
    match value.get("logicalType") {
        Some(JsonValue::String(logical_type)) => Variant::Logical {
            logical_type: logical_type.clone(),
            precision: value.get("precision").and_then(JsonValue::as_u64),
            scale: value.get("scale").and_then(JsonValue::as_u64),
            base: Box::new(base),
        },
        _ => base,
    }
}

// A field's sort `order` plays no part in the binary encoding; it is only validated.
fn check_field_order(order: &JsonValue) -> AvrowResult<()> {
    match order {
        JsonValue::String(s) if matches!(s.as_str(), "ascending" | "descending" | "ignore") => Ok(()),
        JsonValue::String(_) => Err(AvrowErr::UnknownFieldOrdering),
        _ => Err(AvrowErr::InvalidFieldOrdering),
    }
}

// Parses aliases of a field
fn parse_aliases(aliases: Option<&JsonValue>) -> Option<Vec<String>> {
    match aliases {
        Some(JsonValue::Array(ref aliases)) => {
            let mut alias_parsed = Vec::with_capacity(aliases.len());
            for a in aliases {
                let a = a.as_str().map(ToOwned::to_owned)?;
                alias_parsed.push(a);
            }
            Some(alias_parsed)
        }
        _ => None,
    }
}

// Aliases of named types are relative to the namespace of the type they alias.
fn qualify_aliases(aliases: Option<Vec<String>>, name: &Name) -> Option<Vec<String>> {
    aliases.map(|a| {
        a.iter()
            .map(|a| Name::qualify(a, name.namespace()))
            .collect()
    })
}
