//! Typed VM scalars.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Declared type of a guest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// 32-bit integer.
    I32,
    /// 64-bit integer.
    I64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// A guest-level scalar: export argument, export return, or global value.
///
/// The type tag travels with the value so restores are type-exact; globals
/// are never restored across a width or float/integer boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// 32-bit integer.
    I32(i32),
    /// 64-bit integer.
    I64(i64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
}

impl Value {
    /// The declared type of this value.
    #[must_use]
    pub fn ty(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
        }
    }

    /// Bit pattern of the value, for bitwise state comparison.
    ///
    /// Distinct NaN payloads compare unequal here, which is what a
    /// determinism check wants.
    #[must_use]
    pub fn to_bits(&self) -> u64 {
        match self {
            Value::I32(v) => *v as u32 as u64,
            Value::I64(v) => *v as u64,
            Value::F32(v) => u64::from(v.to_bits()),
            Value::F64(v) => v.to_bits(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "{v}i32"),
            Value::I64(v) => write!(f, "{v}i64"),
            Value::F32(v) => write!(f, "{v}f32"),
            Value::F64(v) => write!(f, "{v}f64"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tags_match_variants() {
        assert_eq!(Value::I32(1).ty(), ValueType::I32);
        assert_eq!(Value::I64(1).ty(), ValueType::I64);
        assert_eq!(Value::F32(1.0).ty(), ValueType::F32);
        assert_eq!(Value::F64(1.0).ty(), ValueType::F64);
    }

    #[test]
    fn bit_patterns_distinguish_nan_payloads() {
        let quiet = Value::F64(f64::from_bits(0x7ff8_0000_0000_0000));
        let payload = Value::F64(f64::from_bits(0x7ff8_0000_0000_0001));
        assert_ne!(quiet.to_bits(), payload.to_bits());
    }
}
