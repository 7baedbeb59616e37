use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Reason code reported by a framebuffer completeness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FboStatus {
    Complete,
    /// The format combination is not renderable on this device.
    Unsupported,
    IncompleteAttachment,
    IncompleteMissingAttachment,
    IncompleteDimensions,
    IncompleteMultisample,
    /// Raw status value the backend could not classify.
    Unknown(u32),
}

impl FboStatus {
    pub fn is_complete(self) -> bool {
        self == FboStatus::Complete
    }
}

impl fmt::Display for FboStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FboStatus::Complete => write!(f, "complete"),
            FboStatus::Unsupported => write!(f, "unsupported format combination"),
            FboStatus::IncompleteAttachment => write!(f, "incomplete attachment"),
            FboStatus::IncompleteMissingAttachment => write!(f, "missing attachment"),
            FboStatus::IncompleteDimensions => write!(f, "incomplete dimensions"),
            FboStatus::IncompleteMultisample => write!(f, "incomplete multisample setup"),
            FboStatus::Unknown(raw) => write!(f, "unknown status 0x{raw:x}"),
        }
    }
}

/// Imaging pipeline errors shared by every stimpipe crate.
///
/// Contract rule: this type lives in `stimpipe-core` and is re-exported by runtimes.
#[derive(Debug, Error)]
pub enum ImagingError {
    // ---- Configuration time ----
    #[error("required GPU capability missing: {0}")]
    MissingCapability(String),

    #[error("could not allocate {stage} framebuffer: {status}")]
    FboAllocation { stage: String, status: FboStatus },

    #[error("pipeline precondition violated: {0}")]
    Precondition(String),

    // ---- Hook chains ----
    #[error("no such hook point '{0}'")]
    UnknownHook(String),

    #[error("no such built-in operation '{0}'")]
    UnknownBuiltin(String),

    #[error("bad blit configuration '{config}': {msg}")]
    BlitConfig { config: String, msg: String },

    #[error("hook chain '{hook}' needs {needed}, but it was not reserved at window open: add the {hint} imaging flag")]
    ChainMismatch {
        hook: String,
        needed: String,
        hint: String,
    },

    #[error("slot '{entry}' of hook chain '{hook}' failed: {reason}")]
    EntryFailed {
        hook: String,
        entry: String,
        reason: String,
    },

    #[error("unsupported on this backend: {0}")]
    Unsupported(String),

    // ---- Backend ----
    #[error("vertex shader compile error: {0}")]
    VertexCompile(String),
    #[error("fragment shader compile error: {0}")]
    FragmentCompile(String),
    #[error("geometry shader compile error: {0}")]
    GeometryCompile(String),
    #[error("program link error: {0}")]
    Link(String),
    #[error("backend object creation failed: {0}")]
    GlCreate(String),

    // ---- Configuration files ----
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("json parse error at {}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid config at {}: {msg}", path.display())]
    InvalidConfig { path: PathBuf, msg: String },

    #[error("{0}")]
    Other(String),
}

impl ImagingError {
    pub fn other<T: Into<String>>(s: T) -> Self {
        ImagingError::Other(s.into())
    }

    /// True for errors that must abort window setup or the current flip with a
    /// user-visible message. Per-slot failures only cost the remainder of one chain.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ImagingError::EntryFailed { .. })
    }
}
