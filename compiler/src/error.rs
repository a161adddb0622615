use protocrd_cel::CelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrdError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}, column {column}: {msg}")]
    ParseError {
        msg:    String,
        line:   usize,
        column: usize,
    },

    #[error("Scope mismatch for {marker:?} on {path}: {msg}")]
    ScopeMismatch {
        path:   String,
        marker: String,
        msg:    String,
    },

    #[error("Type mismatch for {marker:?} on {path}: {msg}")]
    TypeMismatch {
        path:   String,
        marker: String,
        msg:    String,
    },

    #[error("Unknown sub-validation {id:?} in {marker:?} on {path}")]
    UnknownSubValidation {
        path:   String,
        marker: String,
        id:     String,
    },

    #[error("Malformed macro in {marker:?} on {path}: {msg}")]
    MalformedMacro {
        path:   String,
        marker: String,
        msg:    String,
    },

    #[error("Unresolved marker {marker:?} at {path}: {msg}")]
    UnresolvedMarker {
        path:   String,
        marker: String,
        msg:    String,
    },

    #[error("Invalid rule in {marker:?} on {path}: {msg}")]
    InvalidRule {
        path:   String,
        marker: String,
        msg:    String,
    },

    #[error("Verifier error: {0}")]
    VerifierError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} breaking change(s) found")]
    Incompatible(usize),

    #[error("{0} fixture document(s) failed")]
    Fixtures(usize),
}

impl CrdError {
    /// Attaches element context to an error raised while handling a CEL rule.
    pub fn from_cel(path: &str, marker: &str, err: CelError) -> Self {
        match err {
            CelError::MalformedMacro { name, msg } => CrdError::MalformedMacro {
                path:   path.to_string(),
                marker: marker.to_string(),
                msg:    format!("{}: {}", name, msg),
            },
            other => CrdError::InvalidRule {
                path:   path.to_string(),
                marker: marker.to_string(),
                msg:    other.to_string(),
            },
        }
    }
}
