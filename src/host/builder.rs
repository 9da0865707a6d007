use super::{
    mut_fn, ref_fn, AvroType, DefaultFn, FieldDesc, HostFn, RecordDesc, Shape, ShapeKind,
    UnionDesc, UnionVariant,
};
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

/// Metadata a record type carries about itself: an optional declared schema
/// and, per field, whether it is required, how to make its default and the
/// alternatives of a union-typed field.
#[derive(Clone, Default)]
pub struct RecordInfo {
    pub(crate) schema: Option<String>,
    pub(crate) required: Vec<bool>,
    pub(crate) defaults: Vec<Option<DefaultFn>>,
    // `None` within an alternatives list stands for the null alternative.
    pub(crate) unions: Vec<Option<Vec<Option<HostFn>>>>,
}

impl RecordInfo {
    pub(crate) fn is_required(&self, field: usize) -> bool {
        self.required.get(field).copied().unwrap_or(false)
    }

    pub(crate) fn default_fn(&self, field: usize) -> Option<&DefaultFn> {
        self.defaults.get(field).and_then(Option::as_ref)
    }

    pub(crate) fn alternatives(&self, field: usize) -> Option<&[Option<HostFn>]> {
        self.unions.get(field).and_then(Option::as_deref)
    }
}

/// Builds the [`Shape`] of a record type field by field.
///
/// ```rust
/// use avrow_typed::{AvroType, RecordBuilder, Shape};
///
/// #[derive(Default)]
/// struct Account {
///     id: i64,
///     owner: Option<String>,
/// }
///
/// impl AvroType for Account {
///     fn describe() -> Shape {
///         RecordBuilder::<Account>::new("com.example.Account")
///             .field("id", |a| &a.id, |a| &mut a.id)
///             .required()
///             .field("owner", |a| &a.owner, |a| &mut a.owner)
///             .build()
///     }
/// }
/// ```
pub struct RecordBuilder<R> {
    name: String,
    fields: Vec<FieldDesc>,
    info: RecordInfo,
    _record: PhantomData<fn() -> R>,
}

impl<R: AvroType> RecordBuilder<R> {
    /// Starts a record named `name`, which may be a full name.
    pub fn new(name: &str) -> Self {
        RecordBuilder {
            name: name.to_string(),
            fields: vec![],
            info: RecordInfo::default(),
            _record: PhantomData,
        }
    }

    /// Adds a field, in schema order.
    pub fn field<F: AvroType>(
        self,
        name: &str,
        get: fn(&R) -> &F,
        get_mut: fn(&mut R) -> &mut F,
    ) -> Self {
        self.push(name, get, get_mut, false)
    }

    /// Adds a field that flattens another record into this one. Such fields
    /// cannot be represented in Avro, so using the type fails with an error.
    pub fn embedded<F: AvroType>(
        self,
        name: &str,
        get: fn(&R) -> &F,
        get_mut: fn(&mut R) -> &mut F,
    ) -> Self {
        self.push(name, get, get_mut, true)
    }

    fn push<F: AvroType>(
        mut self,
        name: &str,
        get: fn(&R) -> &F,
        get_mut: fn(&mut R) -> &mut F,
        embedded: bool,
    ) -> Self {
        self.fields.push(FieldDesc {
            name: name.to_string(),
            host: F::host_type,
            get: ref_fn(move |v| v.downcast_ref::<R>().map(|r| get(r).as_target())),
            get_mut: mut_fn(move |v| v.downcast_mut::<R>().map(|r| get_mut(r).as_target_mut())),
            embedded,
        });
        self.info.required.push(false);
        self.info.defaults.push(None);
        self.info.unions.push(None);
        self
    }

    /// Marks the last added field as required: its schema has no default,
    /// so a writer that lacks it cannot be read.
    pub fn required(mut self) -> Self {
        if let Some(r) = self.info.required.last_mut() {
            *r = true;
        }
        self
    }

    /// Sets the value given to the last added field when the writer does not
    /// have it.
    pub fn with_default<F, D>(mut self, make: D) -> Self
    where
        F: AvroType,
        D: Fn() -> F + Send + Sync + 'static,
    {
        if let Some(d) = self.info.defaults.last_mut() {
            let make: DefaultFn = Arc::new(move || make().into_target());
            *d = Some(make);
        }
        self
    }

    /// Lists the union alternatives of the last added field in schema
    /// order; `None` stands for `null`.
    pub fn alternatives(mut self, alternatives: Vec<Option<HostFn>>) -> Self {
        if let Some(u) = self.info.unions.last_mut() {
            *u = Some(alternatives);
        }
        self
    }

    /// Declares the schema of the record. The text is used verbatim in
    /// place of an inferred schema.
    pub fn schema(mut self, text: &str) -> Self {
        self.info.schema = Some(text.to_string());
        self
    }

    /// Finishes the record.
    pub fn build(self) -> Shape {
        Shape(ShapeKind::Record(RecordDesc {
            name: self.name,
            fields: self.fields,
            info: self.info,
        }))
    }
}

/// Builds the [`Shape`] of an enum whose variants are the alternatives of
/// an Avro union, in declaration order.
///
/// ```rust
/// use avrow_typed::{AvroType, Shape, UnionBuilder};
///
/// #[derive(Debug, PartialEq)]
/// enum Value {
///     Nothing,
///     Number(i64),
///     Text(String),
/// }
///
/// impl Default for Value {
///     fn default() -> Self { Value::Nothing }
/// }
///
/// impl AvroType for Value {
///     fn describe() -> Shape {
///         UnionBuilder::<Value>::new()
///             .null(|v| matches!(v, Value::Nothing), || Value::Nothing)
///             .variant(Value::Number, |v| match v { Value::Number(n) => Some(n), _ => None })
///             .variant(Value::Text, |v| match v { Value::Text(s) => Some(s), _ => None })
///             .build()
///     }
/// }
/// ```
pub struct UnionBuilder<U> {
    variants: Vec<UnionVariant>,
    _union: PhantomData<fn() -> U>,
}

impl<U: AvroType> Default for UnionBuilder<U> {
    fn default() -> Self {
        UnionBuilder::new()
    }
}

impl<U: AvroType> UnionBuilder<U> {
    /// Starts an empty union.
    pub fn new() -> Self {
        UnionBuilder {
            variants: vec![],
            _union: PhantomData,
        }
    }

    /// Adds the `null` alternative: `is` recognises it and `make` builds it.
    pub fn null(mut self, is: fn(&U) -> bool, make: fn() -> U) -> Self {
        self.variants.push(UnionVariant::Null {
            is: Arc::new(move |v: &dyn Any| v.downcast_ref::<U>().map_or(false, is)),
            select: Arc::new(move |v: &mut dyn Any| match v.downcast_mut::<U>() {
                Some(u) => {
                    *u = make();
                    true
                }
                None => false,
            }),
        });
        self
    }

    /// Adds an alternative holding a `P`: `wrap` builds the enum from a
    /// payload and `get` extracts it.
    pub fn variant<P: AvroType>(mut self, wrap: fn(P) -> U, get: fn(&U) -> Option<&P>) -> Self {
        self.variants.push(UnionVariant::Value {
            host: P::host_type,
            get: ref_fn(move |v| v.downcast_ref::<U>().and_then(get).map(|p| p.as_target())),
            commit: Arc::new(move |dst: &mut dyn Any, payload: Box<dyn Any>| {
                match (dst.downcast_mut::<U>(), P::from_target(payload)) {
                    (Some(u), Some(p)) => {
                        *u = wrap(p);
                        true
                    }
                    _ => false,
                }
            }),
        });
        self
    }

    /// Finishes the union.
    pub fn build(self) -> Shape {
        Shape(ShapeKind::Union(UnionDesc {
            name: std::any::type_name::<U>(),
            variants: self.variants,
        }))
    }
}

/// Implements [`AvroType`](crate::AvroType) for a struct by listing its
/// fields in schema order. The record is named after the struct unless a
/// name is given with `as`.
///
/// ```rust
/// use avrow_typed::avro_record;
///
/// #[derive(Default)]
/// struct Reading {
///     sensor: String,
///     value: f64,
/// }
///
/// avro_record!(Reading as "com.example.Reading" { sensor, value });
/// ```
#[macro_export]
macro_rules! avro_record {
    ($ty:ident { $($field:ident),* $(,)? }) => {
        $crate::avro_record!(@impl $ty, stringify!($ty), [$($field),*]);
    };
    ($ty:ident as $name:literal { $($field:ident),* $(,)? }) => {
        $crate::avro_record!(@impl $ty, $name, [$($field),*]);
    };
    (@impl $ty:ident, $name:expr, [$($field:ident),*]) => {
        impl $crate::AvroType for $ty {
            fn describe() -> $crate::Shape {
                $crate::RecordBuilder::<$ty>::new($name)
                    $(.field(stringify!($field), |r| &r.$field, |r| &mut r.$field))*
                    .build()
            }
        }
    };
}
