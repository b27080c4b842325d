//! Sandboxed arithmetic for `/calculate`.
//!
//! The input is untrusted network text. It is tokenized against a fixed
//! alphabet and evaluated by a small recursive-descent parser; nothing is ever
//! handed to an interpreter.
//!
//! Supported: decimal literals, `+ - * / %`, parentheses, unary `+`/`-` and
//! the functions `round floor ceil abs sqrt pow min max`.
//!
//! ```ignore
//! let calc = mcp_gateway::calc::calculate("round(19.995, 2)")?;
//! assert_eq!(calc.result, 20.0);
//! ```

mod format;
mod lexer;
mod parser;

use serde::Serialize;
use thiserror::Error;

pub use format::format_number;

/// Longest accepted expression, in characters.
pub const MAX_EXPRESSION_LEN: usize = 1000;

/// Deepest accepted nesting of parentheses, unary operators and calls.
pub const MAX_DEPTH: usize = 64;

/// Largest `|n|` accepted by `round(x, n)`.
const MAX_ROUND_DIGITS: f64 = 15.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalcError {
    #[error("Expression is empty")]
    Empty,

    #[error("Expression is longer than {max} characters")]
    TooLong { max: usize },

    #[error("Disallowed character '{ch}' at position {pos}")]
    DisallowedCharacter { ch: char, pos: usize },

    #[error("Unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("Invalid number '{0}'")]
    InvalidNumber(String),

    #[error("Unexpected '{found}' at position {pos}")]
    UnexpectedToken { found: String, pos: usize },

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Expression is nested deeper than {max} levels")]
    TooDeep { max: usize },

    #[error("{function}() takes {expected} argument(s), got {got}")]
    Arity {
        function: &'static str,
        expected: &'static str,
        got: usize,
    },

    #[error("round() digits must be a whole number between -15 and 15")]
    InvalidDigits,

    #[error("Result is not a finite number")]
    NonFinite,
}

/// Allowlisted functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Function {
    Round,
    Floor,
    Ceil,
    Abs,
    Sqrt,
    Pow,
    Min,
    Max,
}

impl Function {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        match name {
            "round" => Some(Function::Round),
            "floor" => Some(Function::Floor),
            "ceil" => Some(Function::Ceil),
            "abs" => Some(Function::Abs),
            "sqrt" => Some(Function::Sqrt),
            "pow" => Some(Function::Pow),
            "min" => Some(Function::Min),
            "max" => Some(Function::Max),
            _ => None,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Function::Round => "round",
            Function::Floor => "floor",
            Function::Ceil => "ceil",
            Function::Abs => "abs",
            Function::Sqrt => "sqrt",
            Function::Pow => "pow",
            Function::Min => "min",
            Function::Max => "max",
        }
    }

    pub(crate) fn apply(&self, args: &[f64]) -> Result<f64, CalcError> {
        let value = match (self, args) {
            (Function::Round, [x]) => x.round(),
            (Function::Round, [x, digits]) => round_to(*x, *digits)?,
            (Function::Floor, [x]) => x.floor(),
            (Function::Ceil, [x]) => x.ceil(),
            (Function::Abs, [x]) => x.abs(),
            (Function::Sqrt, [x]) => x.sqrt(),
            (Function::Pow, [base, exp]) => base.powf(*exp),
            (Function::Min, [first, rest @ ..]) => rest.iter().fold(*first, |a, b| a.min(*b)),
            (Function::Max, [first, rest @ ..]) => rest.iter().fold(*first, |a, b| a.max(*b)),
            _ => {
                return Err(CalcError::Arity {
                    function: self.name(),
                    expected: self.arity(),
                    got: args.len(),
                })
            }
        };

        if value.is_finite() {
            Ok(value)
        } else {
            Err(CalcError::NonFinite)
        }
    }

    fn arity(&self) -> &'static str {
        match self {
            Function::Round => "1 or 2",
            Function::Pow => "2",
            Function::Min | Function::Max => "at least 1",
            _ => "1",
        }
    }
}

/// Round half away from zero to `digits` decimal places.
///
/// The shift by `10^digits` is applied to the shortest decimal representation
/// of `x` rather than by binary multiplication, so `19.995` rounds to `20`
/// instead of drifting to `1999.4999…`.
fn round_to(x: f64, digits: f64) -> Result<f64, CalcError> {
    if digits.fract() != 0.0 || digits.abs() > MAX_ROUND_DIGITS {
        return Err(CalcError::InvalidDigits);
    }
    let digits = digits as i32;
    if digits == 0 {
        return Ok(x.round());
    }

    let scaled: f64 = format!("{}e{}", x, digits).parse().unwrap_or(f64::NAN);
    let rounded = scaled.round();
    Ok(format!("{}e{}", rounded, -digits)
        .parse()
        .unwrap_or(f64::NAN))
}

/// Response body for `/calculate`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Calculation {
    pub expression: String,
    pub result: f64,
    pub formatted: String,
}

/// Evaluate an untrusted expression.
pub fn evaluate(expression: &str) -> Result<f64, CalcError> {
    if expression.chars().count() > MAX_EXPRESSION_LEN {
        return Err(CalcError::TooLong {
            max: MAX_EXPRESSION_LEN,
        });
    }
    let tokens = lexer::tokenize(expression)?;
    let value = parser::Parser::new(&tokens).evaluate()?;
    if !value.is_finite() {
        return Err(CalcError::NonFinite);
    }
    // Normalise -0 so results never render as "-0".
    Ok(if value == 0.0 { 0.0 } else { value })
}

/// Evaluate and format for the HTTP response.
pub fn calculate(expression: &str) -> Result<Calculation, CalcError> {
    let result = evaluate(expression)?;
    Ok(Calculation {
        expression: expression.to_string(),
        result,
        formatted: format_number(result),
    })
}
