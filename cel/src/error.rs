use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CelError {
    #[error("CEL parse error at column {column}: {msg}")]
    Parse {
        msg:    String,
        column: usize,
    },

    #[error("Malformed macro \"{name}\": {msg}")]
    MalformedMacro {
        name: String,
        msg:  String,
    },

    #[error("CEL evaluation error: {0}")]
    Eval(String),
}

impl CelError {
    pub(crate) fn eval(msg: impl Into<String>) -> Self {
        CelError::Eval(msg.into())
    }

    pub(crate) fn malformed(name: &str, msg: impl Into<String>) -> Self {
        CelError::MalformedMacro {
            name: name.to_string(),
            msg:  msg.into(),
        }
    }
}
