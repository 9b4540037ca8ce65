use thiserror::Error;

/// Errors raised while executing a unit program
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// One or more units could not be resolved by any resolver
    #[error("unresolved units: {}", .names.join(", "))]
    Unresolved { names: Vec<String> },
    #[error("unit {unit} has no proc `{proc_name}`")]
    MissingProc { unit: String, proc_name: String },
    #[error("malformed unit {unit} (line {line}): {reason}")]
    Malformed {
        unit: String,
        line: usize,
        reason: String,
    },
    #[error("main argument {index} was not supplied")]
    MissingArgument { index: usize },
    #[error("call depth exceeded {0}")]
    DepthExceeded(usize),
    /// Raised by a `fail` instruction
    #[error("program failed in {unit}: {message}")]
    Failed { unit: String, message: String },
    #[error("execution interrupted")]
    Interrupted,
}

impl ExecError {
    pub fn unresolved(name: impl Into<String>) -> Self {
        ExecError::Unresolved {
            names: vec![name.into()],
        }
    }

    /// Names implicated by an unresolved-symbol failure, empty otherwise
    pub fn missing_names(&self) -> &[String] {
        match self {
            ExecError::Unresolved { names } => names,
            _ => &[],
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, ExecError::Unresolved { .. })
    }
}
