/// Errors raised by the ingestion and load stages
///
/// Probe failures never appear here: the probe absorbs them into an empty
/// `Availability`. Rows with a missing address are dropped by the parser and
/// never surface either.
#[derive(Debug)]
pub enum SyncError {
    /// Transport failure while fetching a chunk
    Download(String),
    /// Remote API answered with a non-2xx status
    Status { status: u16, body: String },
    /// CSV tokenizer failure
    Parse(String),
    /// Delete or insert against the store failed
    Load(String),
    Io(std::io::Error),
    Serialization(serde_json::Error),
    /// A spawned chunk task panicked or was cancelled
    Task(String),
}

impl SyncError {
    /// True for the fatal-to-the-run download class (transport or HTTP status)
    pub fn is_download(&self) -> bool {
        matches!(self, SyncError::Download(_) | SyncError::Status { .. })
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Download(err.to_string())
    }
}

impl From<csv::Error> for SyncError {
    fn from(err: csv::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Load(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err)
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Task(err.to_string())
    }
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Download(e) => write!(f, "Download error: {}", e),
            SyncError::Status { status, body } => {
                write!(f, "Download error: HTTP {}: {}", status, body)
            }
            SyncError::Parse(e) => write!(f, "Parse error: {}", e),
            SyncError::Load(e) => write!(f, "Load error: {}", e),
            SyncError::Io(e) => write!(f, "IO error: {}", e),
            SyncError::Serialization(e) => write!(f, "Serialization error: {}", e),
            SyncError::Task(e) => write!(f, "Task error: {}", e),
        }
    }
}

impl std::error::Error for SyncError {}
