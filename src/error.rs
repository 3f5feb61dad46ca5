//! Error and warning types

use thiserror::Error;

use crate::parser::ParseError;

/// Errors raised while analyzing or executing a statement
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Failed to parse statement: {0}")]
    Parse(#[from] ParseError),

    #[error("Unknown object: {0}")]
    UnknownObject(String),

    #[error("Unknown field '{field}' on object '{object}'")]
    UnknownField { field: String, object: String },

    #[error("Unresolved relationship in subquery: {subquery}")]
    UnresolvedRelationship { subquery: String },

    #[error("Unsupported argument type: {left} and {right}")]
    UnsupportedArgumentType { left: String, right: String },

    #[error("Function not implemented: {0}")]
    FunctionNotImplemented(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("No value bound for parameter {0}")]
    MissingParameter(usize),

    #[error("Invalid statement: {0}")]
    InvalidStatement(String),

    #[error("Result row does not match the field layout: {0}")]
    ShapeMismatch(String),

    #[error("Statement nesting exceeded (max: {max})")]
    NestingTooDeep { max: u8 },

    #[error("Remote call failed: {0}")]
    Remote(String),
}

/// Result type for statement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Non-fatal conditions collected while executing a statement
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// The remote platform rejected one record of a batch
    RecordFailed {
        index: usize,
        id: Option<String>,
        errors: Vec<String>,
    },
    /// Computing a SET value failed, so the record was left out of the batch
    EvaluationFailed { id: String, message: String },
    /// A cache hint was given on a statement whose result is never cached
    CacheHintIgnored(String),
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::RecordFailed { index, id, errors } => match id {
                Some(id) => write!(f, "Record {} ({}) failed: {}", index, id, errors.join("; ")),
                None => write!(f, "Record {} failed: {}", index, errors.join("; ")),
            },
            Warning::EvaluationFailed { id, message } => {
                write!(f, "Record {} skipped: {}", id, message)
            }
            Warning::CacheHintIgnored(kind) => {
                write!(f, "Cache hint ignored for {} statement", kind)
            }
        }
    }
}
