use thiserror::Error;

/// Failures while loading, saving, or mutating flow documents.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },
    #[error("failed to write {path}: {message}")]
    Write { path: String, message: String },
    #[error("YAML parse error in {path}: {message}")]
    Yaml { path: String, message: String },
    #[error("JSON parse error in {path}: {message}")]
    Json { path: String, message: String },
    #[error("unsupported flow document extension for {path} (expected .yml, .yaml or .json)")]
    UnsupportedExtension { path: String },
    #[error("flow '{0}' not found")]
    NotFound(String),
    #[error("flow '{0}' already exists")]
    AlreadyExists(String),
    #[error("flow '{id}' failed validation:\n{}", .violations.join("\n"))]
    Validation { id: String, violations: Vec<String> },
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, FlowError>;

/// Failures while compiling a flow into dialplan text. Compilation is atomic:
/// on error no output is produced.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("flow '{0}' has no root menu (every menu declares a parent)")]
    NoRootMenu(String),
    #[error("flow '{flow_id}' has multiple root menus: {}", .candidates.join(", "))]
    AmbiguousRootMenu {
        flow_id: String,
        candidates: Vec<String>,
    },
}

/// Failures raised by speech-synthesis backends and the prompt asset cache.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("{backend} synthesis failed: {message}")]
    Backend { backend: String, message: String },
    #[error("audio I/O failure at {path}: {message}")]
    Io { path: String, message: String },
    #[error("prompt '{prompt}' has no text for language '{language}'")]
    MissingText { prompt: String, language: String },
}

/// Failures raised by the telephony platform client and the call engine.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("malformed payload from {url}: {message}")]
    Payload { url: String, message: String },
    #[error("call engine invocation failed: {0}")]
    Engine(String),
}

/// Umbrella for deployment, which crosses every failure domain. Each stage
/// keeps its own error type; this only carries them to the caller.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
}
