//! Shared error type for the Weft crates.

use std::fmt;

/// Errors surfaced by model loading, arena construction, and execution.
///
/// Load-time failures (`InvalidFormat`, `GraphCyclic`, `GraphInconsistent`,
/// `ArenaTooSmall`, allocator exhaustion during init) are fatal for the
/// engine being built. Execute-time failures (`StreamingOverflow`,
/// `StreamingNotConfigured`, `SchedulerNotInitialized`) leave the engine in
/// a valid state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeftError {
    /// Binary model file malformed or too short.
    InvalidFormat(String),
    /// Header version outside the accepted set.
    UnsupportedVersion(u32),
    /// Dependency cycle detected; carries a node id on the cycle.
    GraphCyclic { node: u16 },
    /// Duplicate id, dangling topology reference, or out-of-bounds offset.
    GraphInconsistent(String),
    /// Requested arena total smaller than the computed minimum.
    ArenaTooSmall { requested: usize, minimum: usize },
    /// NodePayloads bump allocator overrun.
    NodePayloadsExhausted { requested: usize, available: usize },
    /// Scratch bump allocator overrun.
    ScratchExhausted { requested: usize, available: usize },
    /// Streaming operation on an engine built without streaming.
    StreamingNotConfigured,
    /// Streaming input larger than the StreamingInput window.
    StreamingOverflow { len: usize, capacity: usize },
    /// Streaming execute requested but no scheduler was built.
    SchedulerNotInitialized,
    /// Filesystem failure while reading or writing a model.
    Io(String),
    /// Text spec parse failure (line number is 1-based).
    Parse { line: usize, message: String },
}

impl fmt::Display for WeftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeftError::InvalidFormat(msg) => write!(f, "invalid model format: {}", msg),
            WeftError::UnsupportedVersion(v) => write!(f, "unsupported format version: {}", v),
            WeftError::GraphCyclic { node } => {
                write!(f, "dependency cycle through node {}", node)
            }
            WeftError::GraphInconsistent(msg) => write!(f, "inconsistent graph: {}", msg),
            WeftError::ArenaTooSmall { requested, minimum } => write!(
                f,
                "arena size {} below minimum required {}",
                requested, minimum
            ),
            WeftError::NodePayloadsExhausted { requested, available } => write!(
                f,
                "node payloads region exhausted: requested {}, {} available",
                requested, available
            ),
            WeftError::ScratchExhausted { requested, available } => write!(
                f,
                "scratch region exhausted: requested {}, {} available",
                requested, available
            ),
            WeftError::StreamingNotConfigured => {
                write!(f, "engine not configured for streaming")
            }
            WeftError::StreamingOverflow { len, capacity } => write!(
                f,
                "streaming input of {} bytes exceeds window of {} bytes",
                len, capacity
            ),
            WeftError::SchedulerNotInitialized => {
                write!(f, "streaming mode requested but scheduler is not initialized")
            }
            WeftError::Io(msg) => write!(f, "i/o error: {}", msg),
            WeftError::Parse { line, message } => {
                write!(f, "parse error at line {}: {}", line, message)
            }
        }
    }
}

impl std::error::Error for WeftError {}

impl From<std::io::Error> for WeftError {
    fn from(e: std::io::Error) -> Self {
        WeftError::Io(e.to_string())
    }
}
