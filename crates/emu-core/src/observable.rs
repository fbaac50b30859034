//! Read-only introspection of component state by dotted path.
//!
//! Debuggers and tests look at registers without reaching into private
//! fields. A query never advances the clock or triggers a register side
//! effect.

use std::fmt;

/// The answer to a state query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    /// Byte-wide register, shown as two hex digits.
    U8(u8),
    /// Halfword register, shown as four hex digits.
    U16(u16),
    /// Word register or address, shown as eight hex digits.
    U32(u32),
    /// Counter (cycles, frames), shown in decimal.
    U64(u64),
    I8(i8),
    I32(i32),
    /// Symbolic value such as a CPU mode name.
    String(String),
    List(Vec<Value>),
}

impl Value {
    /// Any unsigned or non-negative value widened to `u64`.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::Bool(v) => Some(u64::from(v)),
            Self::U8(v) => Some(u64::from(v)),
            Self::U16(v) => Some(u64::from(v)),
            Self::U32(v) => Some(u64::from(v)),
            Self::U64(v) => Some(v),
            Self::I8(v) => u64::try_from(v).ok(),
            Self::I32(v) => u64::try_from(v).ok(),
            Self::String(_) | Self::List(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::U8(v) => write!(f, "{v:#04X}"),
            Self::U16(v) => write!(f, "{v:#06X}"),
            Self::U32(v) => write!(f, "{v:#010X}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::I8(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i8 => I8,
    i32 => I32,
    String => String,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

/// A component whose state can be inspected.
pub trait Observable {
    /// Look up one property.
    ///
    /// Paths are dot-separated, outermost component first: `pc`, `r3`,
    /// `flags.z` on a CPU; `cpu.cpsr` or `timer0.counter` on a machine.
    /// Unknown paths yield `None`.
    fn query(&self, path: &str) -> Option<Value>;

    /// The paths `query` understands. `<n>`-style placeholders stand for
    /// an index.
    fn query_paths(&self) -> &'static [&'static str];
}
