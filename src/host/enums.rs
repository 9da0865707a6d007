use super::{EnumDesc, LeafKind, LeafOps, Scalar, Shape, ShapeKind};
use crate::config::MAX_ENUM_SYMBOLS;
use std::any::Any;
use std::fmt::Display;

/// A type with a contiguous, zero-based set of named values, such as a
/// fieldless Rust enum.
///
/// Symbol names are discovered by formatting the values at ordinals 0, 1, 2,
/// ... until the output stops looking like a symbol. Out-of-range ordinals
/// must format either as an empty string, as text containing `(` (for
/// example `Color(7)`), or as the bare number; ordinal `-1` is probed first
/// to learn which. If none of these applies the type is encoded as a `long`.
///
/// ```rust
/// use avrow_typed::{AvroEnum, AvroType, Shape};
/// use std::fmt;
///
/// #[derive(Debug, Default, Clone, Copy, PartialEq)]
/// struct Color(i64);
///
/// impl fmt::Display for Color {
///     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
///         match self.0 {
///             0 => f.write_str("Red"),
///             1 => f.write_str("Green"),
///             n => write!(f, "Color({})", n),
///         }
///     }
/// }
///
/// impl AvroEnum for Color {
///     fn from_ordinal(ordinal: i64) -> Self { Color(ordinal) }
///     fn ordinal(&self) -> i64 { self.0 }
/// }
///
/// impl AvroType for Color {
///     fn describe() -> Shape { Self::shape("Color") }
/// }
/// ```
pub trait AvroEnum: Display + Sized {
    /// Returns the value at `ordinal`, which may be out of range.
    fn from_ordinal(ordinal: i64) -> Self;

    /// Returns the ordinal of this value.
    fn ordinal(&self) -> i64;

    /// Builds the shape of an enumeration type named `name`.
    fn shape(name: &str) -> Shape
    where
        Self: 'static,
    {
        let ops = LeafOps {
            read: read_ordinal::<Self>,
            write: write_ordinal::<Self>,
        };
        match probe_symbols::<Self>() {
            Some(symbols) if !symbols.is_empty() => Shape(ShapeKind::Enum(EnumDesc {
                name: name.to_string(),
                symbols,
                ops,
            })),
            _ => Shape::leaf(LeafKind::Long, ops),
        }
    }
}

fn read_ordinal<E: AvroEnum + 'static>(v: &dyn Any) -> Option<Scalar<'_>> {
    v.downcast_ref::<E>().map(|e| Scalar::Long(e.ordinal()))
}

fn write_ordinal<E: AvroEnum + 'static>(v: &mut dyn Any, s: Scalar<'_>) -> Result<(), String> {
    let slot = v
        .downcast_mut::<E>()
        .ok_or_else(|| format!("cannot set {}", std::any::type_name::<E>()))?;
    match s {
        Scalar::Long(n) => {
            *slot = E::from_ordinal(n);
            Ok(())
        }
        other => Err(format!(
            "cannot set {:?} into {}",
            other,
            std::any::type_name::<E>()
        )),
    }
}

enum OutOfRange {
    Empty,
    Paren,
    Number,
}

/// Discovers the symbols of an enumeration. Returns `None` when the type
/// does not look like an enumeration.
pub(crate) fn probe_symbols<E: AvroEnum>() -> Option<Vec<String>> {
    let sym_of = |i: i64| {
        let v = E::from_ordinal(i);
        (v.to_string(), v.ordinal())
    };
    // Assume that -1 is out of range and see what it prints as.
    let (sym, actual) = sym_of(-1);
    let style = if sym.is_empty() {
        OutOfRange::Empty
    } else if sym.contains('(') {
        OutOfRange::Paren
    } else if sym == actual.to_string() {
        OutOfRange::Number
    } else {
        return None;
    };

    let mut syms: Vec<String> = vec![];
    for i in 0..MAX_ENUM_SYMBOLS {
        let (sym, actual) = sym_of(i);
        if sym.is_empty() {
            return Some(syms);
        }
        match style {
            OutOfRange::Paren if sym.contains('(') => return Some(syms),
            OutOfRange::Number if sym == actual.to_string() => return Some(syms),
            _ => {}
        }
        if syms.last() == Some(&sym) {
            // A repeated value is likely an "unknown" placeholder, so both
            // it and the previous value count as out of range.
            syms.pop();
            return Some(syms);
        }
        if !is_valid_symbol(&sym) {
            return None;
        }
        syms.push(sym);
    }
    // Too many values.
    None
}

// Every symbol must match [A-Za-z_][A-Za-z0-9_]*
fn is_valid_symbol(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    macro_rules! probe_type {
        ($name:ident, |$n:ident| $body:expr) => {
            #[derive(Default)]
            struct $name(i64);
            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    let $n = self.0;
                    f.write_str(&$body)
                }
            }
            impl AvroEnum for $name {
                fn from_ordinal(ordinal: i64) -> Self {
                    $name(ordinal)
                }
                fn ordinal(&self) -> i64 {
                    self.0
                }
            }
        };
    }

    probe_type!(Paren, |n| match n {
        0 => "x".to_string(),
        1 => "y".to_string(),
        2 => "z".to_string(),
        n => format!("Paren({})", n),
    });

    probe_type!(Empty, |n| match n {
        0 => "One".to_string(),
        1 => "Two".to_string(),
        _ => String::new(),
    });

    probe_type!(Number, |n| match n {
        0 => "A".to_string(),
        n => n.to_string(),
    });

    probe_type!(Repeated, |n| match n {
        0 => "A".to_string(),
        1 => "B".to_string(),
        _ => "Unknown".to_string(),
    });

    probe_type!(NoStyle, |n| match n {
        0 => "A".to_string(),
        _ => "whatever".to_string(),
    });

    probe_type!(BadSymbol, |n| match n {
        0 => "a b".to_string(),
        _ => String::new(),
    });

    probe_type!(Endless, |n| format!("S{}", n.abs()));

    #[test]
    fn probes_paren_style() {
        assert_eq!(probe_symbols::<Paren>(), Some(vec!["x".into(), "y".into(), "z".into()]));
    }

    #[test]
    fn probes_empty_style() {
        assert_eq!(probe_symbols::<Empty>(), Some(vec!["One".into(), "Two".into()]));
    }

    #[test]
    fn probes_number_style() {
        assert_eq!(probe_symbols::<Number>(), Some(vec!["A".into()]));
    }

    #[test]
    fn repeated_symbol_drops_previous() {
        assert_eq!(probe_symbols::<Repeated>(), Some(vec!["A".into(), "B".into()]));
    }

    #[test]
    fn unrecognised_out_of_range_style() {
        assert_eq!(probe_symbols::<NoStyle>(), None);
    }

    #[test]
    fn invalid_symbol_is_not_an_enum() {
        assert_eq!(probe_symbols::<BadSymbol>(), None);
    }

    #[test]
    fn too_many_symbols() {
        // -1 prints as "S1", which matches no out-of-range style.
        assert_eq!(probe_symbols::<Endless>(), None);
    }
}
