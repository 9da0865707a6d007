// AvroType implementations for std types, uuid and timestamps.

use super::{
    ArrayDesc, AvroType, HostType, LeafKind, LeafOps, MapDesc, NullableDesc, Scalar, Shape,
    ShapeKind,
};
use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

fn mismatch<T>(s: &Scalar<'_>) -> String {
    format!("cannot set {:?} into {}", s, std::any::type_name::<T>())
}

fn slot<T: 'static>(v: &mut dyn Any) -> Result<&mut T, String> {
    v.downcast_mut::<T>()
        .ok_or_else(|| format!("target is not a {}", std::any::type_name::<T>()))
}

fn read_int<T: Copy + Into<i64> + 'static>(v: &dyn Any) -> Option<Scalar<'_>> {
    v.downcast_ref::<T>().map(|n| Scalar::Long((*n).into()))
}

fn write_int<T: TryFrom<i64> + 'static>(v: &mut dyn Any, s: Scalar<'_>) -> Result<(), String> {
    let dst = slot::<T>(v)?;
    match s {
        Scalar::Long(n) => {
            *dst = T::try_from(n).map_err(|_| {
                format!(
                    "value {} out of range for {}",
                    n,
                    std::any::type_name::<T>()
                )
            })?;
            Ok(())
        }
        other => Err(mismatch::<T>(&other)),
    }
}

macro_rules! int_types {
    ($($t:ty => $kind:ident),*) => {
        $(
            impl AvroType for $t {
                fn describe() -> Shape {
                    Shape::leaf(LeafKind::$kind, LeafOps {
                        read: read_int::<$t>,
                        write: write_int::<$t>,
                    })
                }
            }
        )*
    };
}

int_types!(i8 => Int, i16 => Int, i32 => Int, u8 => Int, u16 => Int, i64 => Long, u32 => Long);

// No Avro type holds the full range of these.
impl AvroType for u64 {
    fn describe() -> Shape {
        Shape::unsupported()
    }
}

impl AvroType for usize {
    fn describe() -> Shape {
        Shape::unsupported()
    }
}

impl AvroType for bool {
    fn describe() -> Shape {
        fn read(v: &dyn Any) -> Option<Scalar<'_>> {
            v.downcast_ref::<bool>().map(|b| Scalar::Boolean(*b))
        }
        fn write(v: &mut dyn Any, s: Scalar<'_>) -> Result<(), String> {
            let dst = slot::<bool>(v)?;
            match s {
                Scalar::Boolean(b) => {
                    *dst = b;
                    Ok(())
                }
                other => Err(mismatch::<bool>(&other)),
            }
        }
        Shape::leaf(LeafKind::Boolean, LeafOps { read, write })
    }
}

impl AvroType for f32 {
    fn describe() -> Shape {
        fn read(v: &dyn Any) -> Option<Scalar<'_>> {
            v.downcast_ref::<f32>().map(|f| Scalar::Double(f64::from(*f)))
        }
        fn write(v: &mut dyn Any, s: Scalar<'_>) -> Result<(), String> {
            let dst = slot::<f32>(v)?;
            match s {
                Scalar::Double(f) => {
                    *dst = f as f32;
                    Ok(())
                }
                other => Err(mismatch::<f32>(&other)),
            }
        }
        Shape::leaf(LeafKind::Float, LeafOps { read, write })
    }
}

impl AvroType for f64 {
    fn describe() -> Shape {
        fn read(v: &dyn Any) -> Option<Scalar<'_>> {
            v.downcast_ref::<f64>().map(|f| Scalar::Double(*f))
        }
        fn write(v: &mut dyn Any, s: Scalar<'_>) -> Result<(), String> {
            let dst = slot::<f64>(v)?;
            match s {
                Scalar::Double(f) => {
                    *dst = f;
                    Ok(())
                }
                other => Err(mismatch::<f64>(&other)),
            }
        }
        Shape::leaf(LeafKind::Double, LeafOps { read, write })
    }
}

impl AvroType for String {
    fn describe() -> Shape {
        fn read(v: &dyn Any) -> Option<Scalar<'_>> {
            v.downcast_ref::<String>()
                .map(|s| Scalar::String(Cow::Borrowed(s.as_str())))
        }
        fn write(v: &mut dyn Any, s: Scalar<'_>) -> Result<(), String> {
            let dst = slot::<String>(v)?;
            match s {
                Scalar::String(s) => {
                    *dst = s.into_owned();
                    Ok(())
                }
                Scalar::Bytes(b) => {
                    *dst = String::from_utf8(b.into_owned())
                        .map_err(|_| "invalid utf-8 in string value".to_string())?;
                    Ok(())
                }
                other => Err(mismatch::<String>(&other)),
            }
        }
        Shape::leaf(LeafKind::String, LeafOps { read, write })
    }
}

impl AvroType for () {
    fn describe() -> Shape {
        fn read(v: &dyn Any) -> Option<Scalar<'_>> {
            v.downcast_ref::<()>().map(|_| Scalar::Null)
        }
        fn write(_: &mut dyn Any, _: Scalar<'_>) -> Result<(), String> {
            Ok(())
        }
        Shape::leaf(LeafKind::Null, LeafOps { read, write })
    }
}

// Boxes are transparent: a Box<T> has the host type of T and exposes its
// pointee to the codec.
impl<T: AvroType> AvroType for Box<T> {
    fn describe() -> Shape {
        T::describe()
    }

    fn host_type() -> HostType {
        T::host_type()
    }

    fn as_target(&self) -> &dyn Any {
        (**self).as_target()
    }

    fn as_target_mut(&mut self) -> &mut dyn Any {
        (**self).as_target_mut()
    }

    fn from_target(target: Box<dyn Any>) -> Option<Self> {
        T::from_target(target).map(Box::new)
    }

    fn into_target(self) -> Box<dyn Any> {
        (*self).into_target()
    }
}

fn read_bytes(v: &dyn Any) -> Option<Scalar<'_>> {
    v.downcast_ref::<Vec<u8>>()
        .map(|b| Scalar::Bytes(Cow::Borrowed(b.as_slice())))
}

fn write_bytes(v: &mut dyn Any, s: Scalar<'_>) -> Result<(), String> {
    let dst = slot::<Vec<u8>>(v)?;
    match s {
        Scalar::Bytes(b) => {
            *dst = b.into_owned();
            Ok(())
        }
        Scalar::String(s) => {
            *dst = s.into_owned().into_bytes();
            Ok(())
        }
        other => Err(mismatch::<Vec<u8>>(&other)),
    }
}

fn vec_len<T: AvroType>(v: &dyn Any) -> Option<usize> {
    v.downcast_ref::<Vec<T>>().map(Vec::len)
}

fn vec_get<T: AvroType>(v: &dyn Any, i: usize) -> Option<&dyn Any> {
    v.downcast_ref::<Vec<T>>()?.get(i).map(|e| e.as_target())
}

fn vec_push<T: AvroType>(v: &mut dyn Any) -> Option<&mut dyn Any> {
    let v = v.downcast_mut::<Vec<T>>()?;
    v.push(T::default());
    v.last_mut().map(|e| e.as_target_mut())
}

// Vec<u8> is a byte string; any other Vec is an array.
impl<T: AvroType> AvroType for Vec<T> {
    fn describe() -> Shape {
        if TypeId::of::<T>() == TypeId::of::<u8>() {
            return Shape::leaf(
                LeafKind::Bytes,
                LeafOps {
                    read: read_bytes,
                    write: write_bytes,
                },
            );
        }
        Shape(ShapeKind::Array(ArrayDesc {
            elem: T::host_type,
            len: vec_len::<T>,
            get: vec_get::<T>,
            push_default: vec_push::<T>,
        }))
    }
}

fn read_fixed<const N: usize>(v: &dyn Any) -> Option<Scalar<'_>> {
    v.downcast_ref::<[u8; N]>()
        .map(|b| Scalar::Bytes(Cow::Borrowed(&b[..])))
}

fn write_fixed<const N: usize>(v: &mut dyn Any, s: Scalar<'_>) -> Result<(), String> {
    let dst = slot::<[u8; N]>(v)?;
    match s {
        Scalar::Bytes(b) if b.len() == N => {
            dst.copy_from_slice(&b);
            Ok(())
        }
        Scalar::Bytes(b) => Err(format!("fixed value has {} bytes, want {}", b.len(), N)),
        other => Err(mismatch::<[u8; N]>(&other)),
    }
}

impl<const N: usize> AvroType for [u8; N]
where
    [u8; N]: Default,
{
    fn describe() -> Shape {
        Shape::leaf(
            LeafKind::Fixed(N),
            LeafOps {
                read: read_fixed::<N>,
                write: write_fixed::<N>,
            },
        )
    }
}

fn option_get<T: AvroType>(v: &dyn Any) -> Option<Option<&dyn Any>> {
    v.downcast_ref::<Option<T>>()
        .map(|o| o.as_ref().map(|e| e.as_target()))
}

fn option_clear<T: AvroType>(v: &mut dyn Any) -> bool {
    match v.downcast_mut::<Option<T>>() {
        Some(o) => {
            *o = None;
            true
        }
        None => false,
    }
}

fn option_insert<T: AvroType>(v: &mut dyn Any) -> Option<&mut dyn Any> {
    let o = v.downcast_mut::<Option<T>>()?;
    Some(o.insert(T::default()).as_target_mut())
}

impl<T: AvroType> AvroType for Option<T> {
    fn describe() -> Shape {
        Shape(ShapeKind::Nullable(NullableDesc {
            elem: T::host_type,
            get: option_get::<T>,
            clear: option_clear::<T>,
            insert_default: option_insert::<T>,
        }))
    }
}

fn map_entries<K, V>(v: &dyn Any) -> Option<Vec<(&dyn Any, &dyn Any)>>
where
    K: AvroType + Eq + Hash,
    V: AvroType,
{
    let m = v.downcast_ref::<HashMap<K, V>>()?;
    Some(
        m.iter()
            .map(|(k, v)| (k.as_target(), v.as_target()))
            .collect(),
    )
}

fn map_insert<K, V>(v: &mut dyn Any, key: String, value: Box<dyn Any>) -> bool
where
    K: AvroType + Eq + Hash,
    V: AvroType,
{
    let write_key = match K::host_type().leaf_ops() {
        Some(ops) => ops.write,
        None => return false,
    };
    let mut k = K::default();
    if write_key(k.as_target_mut(), Scalar::String(Cow::Owned(key))).is_err() {
        return false;
    }
    match (v.downcast_mut::<HashMap<K, V>>(), V::from_target(value)) {
        (Some(m), Some(value)) => {
            m.insert(k, value);
            true
        }
        _ => false,
    }
}

impl<K, V> AvroType for HashMap<K, V>
where
    K: AvroType + Eq + Hash,
    V: AvroType,
{
    fn describe() -> Shape {
        Shape(ShapeKind::Map(MapDesc {
            key: K::host_type,
            elem: V::host_type,
            entries: map_entries::<K, V>,
            insert: map_insert::<K, V>,
        }))
    }
}

/// UUIDs travel as strings with the `uuid` logical type; the nil UUID is
/// written as the empty string.
impl AvroType for Uuid {
    fn describe() -> Shape {
        fn read(v: &dyn Any) -> Option<Scalar<'_>> {
            v.downcast_ref::<Uuid>().map(|u| {
                if u.is_nil() {
                    Scalar::String(Cow::Borrowed(""))
                } else {
                    Scalar::String(Cow::Owned(u.hyphenated().to_string()))
                }
            })
        }
        fn write(v: &mut dyn Any, s: Scalar<'_>) -> Result<(), String> {
            let dst = slot::<Uuid>(v)?;
            match s {
                Scalar::String(s) if s.is_empty() => {
                    *dst = Uuid::nil();
                    Ok(())
                }
                Scalar::String(s) => {
                    *dst = Uuid::parse_str(&s).map_err(|e| format!("invalid uuid {:?}: {}", s, e))?;
                    Ok(())
                }
                other => Err(mismatch::<Uuid>(&other)),
            }
        }
        Shape::leaf(LeafKind::Uuid, LeafOps { read, write })
    }
}

/// A point in time encoded as microseconds since the Unix epoch
/// (`timestamp-micros`). Precision beyond a microsecond is dropped on
/// encode. The default value is the epoch itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub SystemTime);

impl Default for Timestamp {
    fn default() -> Self {
        Timestamp(UNIX_EPOCH)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        Timestamp(t)
    }
}

impl From<Timestamp> for SystemTime {
    fn from(t: Timestamp) -> Self {
        t.0
    }
}

impl Timestamp {
    /// Builds a timestamp from microseconds since the Unix epoch.
    pub fn from_micros(micros: i64) -> Timestamp {
        let offset = Duration::from_micros(micros.unsigned_abs());
        if micros >= 0 {
            Timestamp(UNIX_EPOCH + offset)
        } else {
            Timestamp(UNIX_EPOCH - offset)
        }
    }

    /// Returns the number of whole microseconds since the Unix epoch,
    /// saturating at the bounds of `i64`.
    pub fn as_micros(&self) -> i64 {
        match self.0.duration_since(UNIX_EPOCH) {
            Ok(d) => i64::try_from(d.as_micros()).unwrap_or(i64::MAX),
            Err(e) => {
                // Round towards the past so that truncation is consistent.
                let d = e.duration();
                let micros = d.as_micros() + u128::from(d.subsec_nanos() % 1_000 != 0);
                i64::try_from(micros).map(|m| -m).unwrap_or(i64::MIN)
            }
        }
    }
}

impl AvroType for Timestamp {
    fn describe() -> Shape {
        fn read(v: &dyn Any) -> Option<Scalar<'_>> {
            v.downcast_ref::<Timestamp>()
                .map(|t| Scalar::Long(t.as_micros()))
        }
        fn write(v: &mut dyn Any, s: Scalar<'_>) -> Result<(), String> {
            let dst = slot::<Timestamp>(v)?;
            match s {
                Scalar::Long(n) => {
                    *dst = Timestamp::from_micros(n);
                    Ok(())
                }
                other => Err(mismatch::<Timestamp>(&other)),
            }
        }
        Shape::leaf(LeafKind::TimestampMicros, LeafOps { read, write })
    }
}
