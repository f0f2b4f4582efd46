use core::fmt;

use serde::{Deserialize, Serialize};

/// Error values a cell can evaluate to.
///
/// These are cached as the cell's value, not propagated to the caller of
/// `update()`; a dependent that resolves an errored cell sees the typed
/// error and typically caches its own.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The cell has never been evaluated (or was just cleared).
    NotEvaluable,
    /// The cell participates in a reference cycle.
    CyclicalReference,
    /// Division or remainder by zero.
    DivisionByZero,
    /// Arithmetic on a non-numeric operand.
    TypeMismatch,
    /// The result does not fit a finite `f64`.
    Overflow,
}

impl ErrorKind {
    /// Canonical display code for the error.
    pub const fn as_code(self) -> &'static str {
        match self {
            ErrorKind::NotEvaluable => "#N/A",
            ErrorKind::CyclicalReference => "#CYCLE!",
            ErrorKind::DivisionByZero => "#DIV/0!",
            ErrorKind::TypeMismatch => "#VALUE!",
            ErrorKind::Overflow => "#NUM!",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// A cell's cached value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// IEEE-754 double precision number.
    Number(f64),
    /// Owned string value.
    Text(String),
    /// Cached evaluation error.
    Error(ErrorKind),
}

impl Value {
    /// Returns the numeric payload, if any.
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the error payload, if any.
    #[inline]
    pub fn as_error(&self) -> Option<ErrorKind> {
        match self {
            Value::Error(e) => Some(*e),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Error(ErrorKind::NotEvaluable)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<ErrorKind> for Value {
    fn from(e: ErrorKind) -> Self {
        Value::Error(e)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
            Value::Error(e) => write!(f, "{e}"),
        }
    }
}
