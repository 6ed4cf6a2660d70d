use thiserror::Error;

#[derive(Error, Debug)]
pub enum HierflowError {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed descriptor: {0}")]
    MalformedDescriptor(String),

    /// No builder could synthesize a plan for this edge.
    #[error("Boxing not supported for {lbi}: {src} -> {dst} ({reason})")]
    BoxingNotSupported {
        lbi: String,
        src: String,
        dst: String,
        reason: String,
    },

    #[error("No kernel registered for op '{0}'")]
    KernelNotFound(String),

    #[error("Op '{op_name}' has no register bound to '{bn_in_op}'")]
    MissingBnInOp { op_name: String, bn_in_op: String },

    #[error("Register {0} could not be resolved")]
    RegstNotFound(i64),

    #[error("Register {regst_desc_id} holds no blob named '{lbn}'")]
    BlobNotFound { regst_desc_id: i64, lbn: String },

    #[error("Lock poisoned: {0}")]
    Poisoned(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

pub type Result<T> = std::result::Result<T, HierflowError>;
