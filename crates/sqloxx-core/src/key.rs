//! Integer types usable as single-column primary keys.

use std::fmt::{Debug, Display};
use std::hash::Hash;

use crate::value::{FromValue, Value};

/// An integer primary key type.
///
/// Keys are stored as SQLite INTEGER values, so every implementor must be
/// losslessly convertible to `i64`.
pub trait KeyType:
    Copy + Eq + Ord + Hash + Debug + Display + Into<Value> + FromValue + 'static
{
    const MAX: Self;

    /// Convert a stored key, failing when it is out of range for `Self`.
    fn from_i64(value: i64) -> Option<Self>;

    fn to_i64(self) -> i64;

    /// The key after `self`, or `None` on overflow.
    fn checked_next(self) -> Option<Self>;

    /// The first key of an empty table.
    fn first() -> Self;
}

macro_rules! impl_key_type {
    ($($ty:ty),* $(,)?) => {
        $(
            impl KeyType for $ty {
                const MAX: Self = <$ty>::MAX;

                fn from_i64(value: i64) -> Option<Self> {
                    <$ty>::try_from(value).ok()
                }

                fn to_i64(self) -> i64 {
                    i64::from(self)
                }

                fn checked_next(self) -> Option<Self> {
                    self.checked_add(1)
                }

                fn first() -> Self {
                    1
                }
            }
        )*
    };
}

impl_key_type!(i16, i32, i64, u16, u32);

impl FromValue for i16 {
    fn from_value(value: Value) -> crate::Result<Self> {
        narrow(value, "i16")
    }
}

impl FromValue for u16 {
    fn from_value(value: Value) -> crate::Result<Self> {
        narrow(value, "u16")
    }
}

impl FromValue for u32 {
    fn from_value(value: Value) -> crate::Result<Self> {
        narrow(value, "u32")
    }
}

fn narrow<T: TryFrom<i64>>(value: Value, rust_type: &str) -> crate::Result<T> {
    let wide = i64::from_value(value)?;
    T::try_from(wide).map_err(|_| {
        crate::Error::statement(
            crate::StatementErrorKind::ValueType,
            format!("INTEGER value {} does not fit in {}", wide, rust_type),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_next_stops_at_max() {
        assert_eq!(4_i32.checked_next(), Some(5));
        assert_eq!(i16::MAX.checked_next(), None);
        assert_eq!(<u32 as KeyType>::MAX.checked_next(), None);
    }

    #[test]
    fn test_from_i64_range() {
        assert_eq!(i16::from_i64(300), Some(300));
        assert_eq!(i16::from_i64(70_000), None);
        assert_eq!(u16::from_i64(-1), None);
        assert_eq!(i64::from_i64(i64::MIN), Some(i64::MIN));
    }

    #[test]
    fn test_narrow_extraction() {
        assert_eq!(u16::from_value(Value::Integer(12)).unwrap(), 12);
        assert!(u16::from_value(Value::Integer(-12)).is_err());
        assert!(i16::from_value(Value::Float(1.0)).is_err());
    }
}
