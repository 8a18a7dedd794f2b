use miette::Diagnostic;
use thiserror::Error;

/// Result type for compiler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Code-unit ceiling above which a method is not JIT-compiled.
pub const MAX_METHOD_CODE_UNITS: u32 = 0x10000;

/// Errors surfaced while building or transforming a method's MIR graph.
///
/// None of these reach the program being compiled: each one means "this
/// method could not be compiled" and the caller falls back to the
/// interpreter.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum Error {
    #[error("I/O error: {0}")]
    #[diagnostic(code(dex_mir::io_error))]
    Io(String),

    #[error("Invalid method description: {0}")]
    #[diagnostic(code(dex_mir::json_error))]
    Json(String),

    #[error("Method size exceeds compiler limits: {size} code units (limit {limit})")]
    #[diagnostic(
        code(dex_mir::method_too_large),
        help("the method should run in the interpreter")
    )]
    MethodTooLarge { size: u32, limit: u32 },

    #[error("Malformed control flow at offset 0x{offset:04x}: {message}")]
    #[diagnostic(code(dex_mir::malformed_control_flow))]
    MalformedControlFlow { offset: u32, message: String },

    #[error("Invalid instruction at offset 0x{offset:04x}: {message}")]
    #[diagnostic(code(dex_mir::invalid_instruction))]
    InvalidInstruction { offset: u32, message: String },

    #[error("SSA verification failed: {message}")]
    #[diagnostic(code(dex_mir::invalid_ssa))]
    InvalidSsa { message: String },

    #[error("Unsupported construct: {message}")]
    #[diagnostic(code(dex_mir::unsupported))]
    Unsupported { message: String },

    #[error("Internal error: {message}")]
    #[diagnostic(code(dex_mir::internal_error))]
    Internal { message: String },
}

impl Error {
    /// Create a malformed control flow error
    pub fn malformed(offset: u32, message: impl Into<String>) -> Self {
        Error::MalformedControlFlow {
            offset,
            message: message.into(),
        }
    }

    /// Create an invalid instruction error
    pub fn invalid_instruction(offset: u32, message: impl Into<String>) -> Self {
        Error::InvalidInstruction {
            offset,
            message: message.into(),
        }
    }

    /// Create an SSA verification error
    pub fn invalid_ssa(message: impl Into<String>) -> Self {
        Error::InvalidSsa {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    /// Whether the caller should fall back to a non-optimizing path rather
    /// than report a broken upstream contract.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::MethodTooLarge { .. } | Error::Unsupported { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let too_large = Error::MethodTooLarge {
            size: 0x10000,
            limit: MAX_METHOD_CODE_UNITS,
        };
        assert!(too_large.is_recoverable());
        assert!(!Error::malformed(4, "target outside method").is_recoverable());
        assert!(!Error::invalid_ssa("use not dominated").is_recoverable());
    }

    #[test]
    fn test_display_includes_offset() {
        let err = Error::malformed(0x1c, "branch target 0x40 outside method");
        assert_eq!(
            err.to_string(),
            "Malformed control flow at offset 0x001c: branch target 0x40 outside method"
        );
    }
}
