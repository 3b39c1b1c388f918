//! Runtime values and the host's implicit casting rules.
//!
//! Block programs are dynamically typed: every input can receive a number, a string or a
//! boolean and each operation casts on demand. The rules implemented here follow the host
//! runtime closely because the flattened machinery stores program counters, tokens and loop
//! counters in ordinary variables and lists, so any divergence in casting would change the
//! behaviour of the generated code.

use std::{cmp::Ordering, fmt};

use crate::ir::Primitive;

/// A dynamically typed runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A floating point number.
    Number(f64),
    /// A string.
    Text(String),
    /// A boolean, produced by predicates.
    Bool(bool),
}

impl Default for Value {
    fn default() -> Self {
        Value::Number(0.0)
    }
}

impl Value {
    /// Casts to a number. Non-numeric strings and NaN become `0`.
    #[must_use]
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Number(n) if n.is_nan() => 0.0,
            Value::Number(n) => *n,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Text(s) => parse_number(s).filter(|n| !n.is_nan()).unwrap_or(0.0),
        }
    }

    /// Casts to a number without the `0` fallback, used by comparisons.
    ///
    /// Returns `None` when the value does not look like a number. Empty and
    /// whitespace-only strings are not numbers here, although [`Value::to_number`]
    /// maps them to `0`.
    fn strict_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) if n.is_nan() => None,
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            Value::Text(s) if s.trim().is_empty() => None,
            Value::Text(s) => parse_number(s).filter(|n| !n.is_nan()),
        }
    }

    /// Casts to a boolean. `""`, `"0"` and `"false"` (any case) are false, as is `0`.
    #[must_use]
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Text(s) => !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false")),
        }
    }

    /// Compares two values the way the host's `<`, `>` and `=` operators do.
    ///
    /// If both sides are numeric they compare as numbers, otherwise as
    /// case-insensitive strings.
    #[must_use]
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self.strict_number(), other.strict_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => {
                let a = self.to_string().to_lowercase();
                let b = other.to_string().to_lowercase();
                a.cmp(&b)
            }
        }
    }

    /// Host equality (`operator_equals`, list lookups).
    #[must_use]
    pub fn loosely_equals(&self, other: &Value) -> bool {
        self.compare(other) == Ordering::Equal
    }

    /// Returns true if this value is a whole number.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        match self {
            Value::Number(n) => n.is_finite() && n.fract() == 0.0,
            Value::Bool(_) => true,
            Value::Text(s) => !s.contains('.') && parse_number(s).is_some_and(|n| n.fract() == 0.0),
        }
    }
}

/// Parses a string the way the host's `Number()` does for the subset block programs use.
fn parse_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }
    match trimmed {
        "Infinity" | "+Infinity" => return Some(f64::INFINITY),
        "-Infinity" => return Some(f64::NEG_INFINITY),
        _ => {}
    }
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        #[allow(clippy::cast_precision_loss)]
        return u64::from_str_radix(hex, 16).ok().map(|n| n as f64);
    }
    // Rust accepts "inf" and "nan" spellings the host rejects.
    if trimmed.bytes().any(|b| b.is_ascii_alphabetic() && b != b'e' && b != b'E') {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

/// Formats a number the way the host prints it.
fn format_number(n: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if n.is_nan() {
        f.write_str("NaN")
    } else if n.is_infinite() {
        f.write_str(if n > 0.0 { "Infinity" } else { "-Infinity" })
    } else if n == 0.0 {
        f.write_str("0")
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        write!(f, "{n:.0}")
    } else {
        write!(f, "{n}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => format_number(*n, f),
            Value::Text(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&Primitive> for Value {
    /// Literal value of a primitive. Store references evaluate to their name.
    fn from(value: &Primitive) -> Self {
        match value {
            Primitive::Number(n) => Value::Number(*n),
            Primitive::Text(s) => Value::Text(s.clone()),
            Primitive::Variable(store) | Primitive::List(store) | Primitive::Broadcast(store) => {
                Value::Text(store.name.clone())
            }
        }
    }
}
