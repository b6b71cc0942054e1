//! Literal quoting for generated SQL.
//!
//! Default values are never escaped: anything that cannot be written as a
//! plain literal is rejected so the generated script stays readable. Comment
//! payloads use dollar quoting with a tag that cannot occur in the payload.

use crate::error::{Result, SchemaError};

/// Largest integer an `f64` represents exactly (2^53 - 1).
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// A literal value usable as a column default.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// Boolean literal.
    Boolean(bool),
    /// Integer literal.
    Integer(i64),
    /// Floating point literal.
    Float(f64),
    /// String literal.
    String(String),
    /// Raw SQL expression (e.g. `now()`), emitted verbatim.
    Expression(String),
}

impl DefaultValue {
    /// Renders the value as a SQL literal.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::ValueQuoting`] for non-finite floats, floats that
    /// do not survive a round trip through 4-decimal formatting, and strings
    /// containing a single quote.
    pub fn to_sql(&self) -> Result<String> {
        match self {
            Self::Boolean(b) => Ok(b.to_string()),
            Self::Integer(i) => Ok(i.to_string()),
            Self::Float(f) => quote_float(*f),
            Self::String(s) => {
                if s.contains('\'') {
                    return Err(SchemaError::ValueQuoting {
                        value: format!("{s:?}"),
                        reason: "strings containing a single quote are not supported",
                    });
                }
                Ok(format!("'{s}'"))
            }
            Self::Expression(expr) => Ok(expr.clone()),
        }
    }
}

fn quote_float(value: f64) -> Result<String> {
    if !value.is_finite() {
        return Err(SchemaError::ValueQuoting {
            value: value.to_string(),
            reason: "number is not finite",
        });
    }
    if value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER {
        return Ok((value as i64).to_string());
    }
    let fixed = format!("{value:.4}");
    match fixed.parse::<f64>() {
        Ok(parsed) if parsed == value => Ok(fixed),
        _ => Err(SchemaError::ValueQuoting {
            value: value.to_string(),
            reason: "number is not exactly representable with 4 decimal places",
        }),
    }
}

impl From<bool> for DefaultValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i32> for DefaultValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<i64> for DefaultValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for DefaultValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for DefaultValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for DefaultValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Wraps `text` in a dollar-quoted literal.
///
/// Tries `$$`, then `$c1$`, `$c2$`, ... and picks the first tag whose first
/// occurrence in `text + tag` is the closing one.
#[must_use]
pub fn dollar_quote(text: &str) -> String {
    let mut counter = 0_usize;
    loop {
        let tag = if counter == 0 {
            String::from("$$")
        } else {
            format!("$c{counter}$")
        };
        let candidate = format!("{text}{tag}");
        if candidate.find(&tag) == Some(text.len()) {
            return format!("{tag}{text}{tag}");
        }
        counter += 1;
    }
}
