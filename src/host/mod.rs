//! Describes Rust types that values are encoded from and decoded into.
//!
//! A type takes part in encoding and decoding by implementing [`AvroType`].
//! Its [`Shape`] is computed once per process and carries a table of
//! type-erased accessors (field getters, option and sequence mutators, scalar
//! readers and writers) that the decoder and encoder use in place of
//! reflection.

mod builder;
mod enums;
mod impls;

pub use builder::{RecordBuilder, RecordInfo, UnionBuilder};
pub use enums::AvroEnum;
pub(crate) use enums::probe_symbols;
pub use impls::Timestamp;

use once_cell::sync::Lazy;
use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::{Arc, RwLock};

/// A thunk producing the [`HostType`] of a child type. Child types are held
/// lazily so that recursive types can describe themselves.
pub type HostFn = fn() -> HostType;

/// Produces a boxed default value for a record field.
pub type DefaultFn = Arc<dyn Fn() -> Box<dyn Any> + Send + Sync>;

pub(crate) type RefFn = Arc<dyn for<'a> Fn(&'a dyn Any) -> Option<&'a dyn Any> + Send + Sync>;
pub(crate) type MutFn =
    Arc<dyn for<'a> Fn(&'a mut dyn Any) -> Option<&'a mut dyn Any> + Send + Sync>;
pub(crate) type PredFn = Arc<dyn Fn(&dyn Any) -> bool + Send + Sync>;
pub(crate) type CommitFn = Arc<dyn Fn(&mut dyn Any, Box<dyn Any>) -> bool + Send + Sync>;

/// A Rust type that can be encoded to and decoded from Avro.
///
/// Most implementations only provide [`describe`](AvroType::describe),
/// built with [`RecordBuilder`], [`UnionBuilder`] or
/// [`AvroEnum::shape`]; the `avro_record!` macro covers plain records.
///
/// ```rust
/// use avrow_typed::{avro_record, marshal, unmarshal};
///
/// #[derive(Debug, Default, PartialEq)]
/// struct Point {
///     x: i32,
///     y: i32,
/// }
/// avro_record!(Point { x, y });
///
/// let (buf, schema) = marshal(&Point { x: 1, y: -1 }).unwrap();
/// assert_eq!(buf, vec![2, 1]);
///
/// let mut p = Point::default();
/// unmarshal(&buf, &mut p, &schema).unwrap();
/// assert_eq!(p, Point { x: 1, y: -1 });
/// ```
pub trait AvroType: Any + Default {
    /// Describes the shape of the type. Called at most once per process.
    fn describe() -> Shape;

    /// Returns the cached [`HostType`] for this type.
    fn host_type() -> HostType {
        cached::<Self>()
    }

    /// Returns the value that encoding reads from. Smart pointers return
    /// their pointee.
    fn as_target(&self) -> &dyn Any {
        self
    }

    /// Returns the value that decoding writes into.
    fn as_target_mut(&mut self) -> &mut dyn Any {
        self
    }

    /// Rebuilds a value from a boxed target produced by decoding.
    fn from_target(target: Box<dyn Any>) -> Option<Self> {
        target.downcast::<Self>().ok().map(|b| *b)
    }

    /// Converts a value into the boxed target form used by decoding.
    fn into_target(self) -> Box<dyn Any> {
        Box::new(self)
    }
}

/// Handle to the process-wide description of one Rust type.
#[derive(Clone)]
pub struct HostType(Arc<HostDesc>);

struct HostDesc {
    id: TypeId,
    name: &'static str,
    shape: Shape,
    new_value: fn() -> Box<dyn Any>,
    assign: fn(&mut dyn Any, Box<dyn Any>) -> bool,
}

static HOST_TYPES: Lazy<RwLock<HashMap<TypeId, HostType>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn cached<T: AvroType>() -> HostType {
    let id = TypeId::of::<T>();
    if let Some(host) = HOST_TYPES
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(&id)
    {
        return host.clone();
    }
    // Describing happens outside the lock; a racing describer loses.
    let desc = HostDesc {
        id,
        name: std::any::type_name::<T>(),
        shape: T::describe(),
        new_value: new_boxed::<T>,
        assign: assign_boxed::<T>,
    };
    HOST_TYPES
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .entry(id)
        .or_insert_with(|| HostType(Arc::new(desc)))
        .clone()
}

fn new_boxed<T: AvroType>() -> Box<dyn Any> {
    Box::new(T::default())
}

fn assign_boxed<T: AvroType>(dst: &mut dyn Any, src: Box<dyn Any>) -> bool {
    match (dst.downcast_mut::<T>(), src.downcast::<T>()) {
        (Some(dst), Ok(src)) => {
            *dst = *src;
            true
        }
        _ => false,
    }
}

impl HostType {
    /// Returns the host type of `T`.
    pub fn of<T: AvroType>() -> HostType {
        T::host_type()
    }

    pub(crate) fn id(&self) -> TypeId {
        self.0.id
    }

    /// The Rust type name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.0.name
    }

    pub(crate) fn shape(&self) -> &ShapeKind {
        &self.0.shape.0
    }

    pub(crate) fn new_value(&self) -> Box<dyn Any> {
        (self.0.new_value)()
    }

    pub(crate) fn assign(&self, dst: &mut dyn Any, src: Box<dyn Any>) -> bool {
        (self.0.assign)(dst, src)
    }

    // Scalar accessors of leaf and enum types.
    pub(crate) fn leaf_ops(&self) -> Option<LeafOps> {
        match self.shape() {
            ShapeKind::Leaf(_, ops) => Some(*ops),
            ShapeKind::Enum(e) => Some(e.ops),
            _ => None,
        }
    }

    pub(crate) fn is_string(&self) -> bool {
        matches!(self.shape(), ShapeKind::Leaf(LeafKind::String, _))
    }
}

impl PartialEq for HostType {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Debug for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.name)
    }
}

/// The shape of a Rust type as seen by the codec.
pub struct Shape(pub(crate) ShapeKind);

pub(crate) enum ShapeKind {
    Leaf(LeafKind, LeafOps),
    Enum(EnumDesc),
    Array(ArrayDesc),
    Map(MapDesc),
    Nullable(NullableDesc),
    Union(UnionDesc),
    Record(RecordDesc),
    Unsupported,
}

/// The primitive category of a leaf type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LeafKind {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    Fixed(usize),
    TimestampMicros,
    Uuid,
}

/// A scalar value moving between the wire and a leaf type.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Scalar<'a> {
    Null,
    Boolean(bool),
    Long(i64),
    Double(f64),
    Bytes(Cow<'a, [u8]>),
    String(Cow<'a, str>),
}

#[derive(Clone, Copy)]
pub(crate) struct LeafOps {
    pub(crate) read: fn(&dyn Any) -> Option<Scalar<'_>>,
    pub(crate) write: fn(&mut dyn Any, Scalar<'_>) -> Result<(), String>,
}

pub(crate) struct EnumDesc {
    pub(crate) name: String,
    pub(crate) symbols: Vec<String>,
    pub(crate) ops: LeafOps,
}

pub(crate) struct ArrayDesc {
    pub(crate) elem: HostFn,
    pub(crate) len: fn(&dyn Any) -> Option<usize>,
    pub(crate) get: fn(&dyn Any, usize) -> Option<&dyn Any>,
    pub(crate) push_default: fn(&mut dyn Any) -> Option<&mut dyn Any>,
}

pub(crate) struct MapDesc {
    pub(crate) key: HostFn,
    pub(crate) elem: HostFn,
    pub(crate) entries: fn(&dyn Any) -> Option<Vec<(&dyn Any, &dyn Any)>>,
    pub(crate) insert: fn(&mut dyn Any, String, Box<dyn Any>) -> bool,
}

pub(crate) struct NullableDesc {
    pub(crate) elem: HostFn,
    pub(crate) get: fn(&dyn Any) -> Option<Option<&dyn Any>>,
    pub(crate) clear: fn(&mut dyn Any) -> bool,
    pub(crate) insert_default: fn(&mut dyn Any) -> Option<&mut dyn Any>,
}

pub(crate) struct UnionDesc {
    pub(crate) name: &'static str,
    pub(crate) variants: Vec<UnionVariant>,
}

pub(crate) enum UnionVariant {
    Null {
        is: PredFn,
        select: Arc<dyn Fn(&mut dyn Any) -> bool + Send + Sync>,
    },
    Value {
        host: HostFn,
        get: RefFn,
        commit: CommitFn,
    },
}

impl UnionVariant {
    pub(crate) fn host(&self) -> Option<HostType> {
        match self {
            UnionVariant::Null { .. } => None,
            UnionVariant::Value { host, .. } => Some(host()),
        }
    }
}

pub(crate) struct RecordDesc {
    pub(crate) name: String,
    pub(crate) fields: Vec<FieldDesc>,
    pub(crate) info: RecordInfo,
}

pub(crate) struct FieldDesc {
    pub(crate) name: String,
    pub(crate) host: HostFn,
    pub(crate) get: RefFn,
    pub(crate) get_mut: MutFn,
    pub(crate) embedded: bool,
}

/// The union alternative holding a `T`, for
/// [`RecordBuilder::alternatives`]. The `null` alternative is `None`.
pub fn alternative<T: AvroType>() -> Option<HostFn> {
    Some(T::host_type)
}

impl Shape {
    pub(crate) fn leaf(kind: LeafKind, ops: LeafOps) -> Shape {
        Shape(ShapeKind::Leaf(kind, ops))
    }

    /// The shape of a type that has no Avro representation.
    pub fn unsupported() -> Shape {
        Shape(ShapeKind::Unsupported)
    }
}

// Pins the higher-ranked signature on accessor closures.
pub(crate) fn ref_fn<F>(f: F) -> RefFn
where
    F: for<'a> Fn(&'a dyn Any) -> Option<&'a dyn Any> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) fn mut_fn<F>(f: F) -> MutFn
where
    F: for<'a> Fn(&'a mut dyn Any) -> Option<&'a mut dyn Any> + Send + Sync + 'static,
{
    Arc::new(f)
}
