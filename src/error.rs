use thiserror::Error;

#[derive(Error, Debug)]
pub enum SbmatchError {
    #[error("Ruleset error: {0}")]
    Ruleset(#[from] RulesetError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Error, Debug)]
pub enum RulesetError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse ruleset JSON: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("Ruleset is empty")]
    Empty,

    #[error("Malformed rule: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Shared buffer allocation failed: {0}")]
    Mmap(#[source] nix::Error),

    #[error("Fork failed: {0}")]
    Fork(#[source] nix::Error),

    #[error("Wait failed: {0}")]
    Wait(#[source] nix::Error),

    #[error("Worker killed by signal {signal}")]
    WorkerSignaled { signal: String },

    #[error("Worker exited with status {status}")]
    WorkerFailed { status: i32 },

    #[error("Failed to install sandbox profile: {0}")]
    PolicyInstall(String),

    #[error("Worker left no decision for event {index}")]
    SentinelLeak { index: usize },

    #[error("Worker wrote invalid decision byte {byte:#04x} for event {index}")]
    BadDecisionByte { index: usize, byte: u8 },

    #[error("Probe failed for event {index} ({operation})")]
    ProbeFailed { index: usize, operation: String },
}

pub type Result<T> = std::result::Result<T, SbmatchError>;
