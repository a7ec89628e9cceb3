//! Error types and handling for Hermod

/// Result type alias for Hermod operations
pub type Result<T> = std::result::Result<T, HermodError>;

/// Error kinds surfaced by shared-memory segment creation.
///
/// Mirrors the errno space of `shm_open`/`ftruncate`; each kind maps to one
/// class of failure so callers can distinguish misconfiguration from
/// resource exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SegmentError {
    #[error("segment name is empty")]
    EmptyName,
    #[error("segment name must start with a leading slash")]
    NameWithoutLeadingSlash,
    #[error("insufficient permissions to access the segment")]
    InsufficientPermissions,
    #[error("filesystem does not support resizing the segment")]
    NoResizeSupport,
    #[error("requested size exceeds the maximum file size")]
    RequestedMemoryExceedsMax,
    #[error("file descriptor is not valid")]
    InvalidDescriptor,
    #[error("segment already exists")]
    AlreadyExists,
    #[error("segment does not exist")]
    DoesNotExist,
    #[error("segment path is a directory")]
    PathIsDirectory,
    #[error("too many symbolic links while resolving the segment path")]
    TooManySymbolicLinks,
    #[error("process limit of open files reached")]
    ProcessFileLimitReached,
    #[error("system limit of open files reached")]
    SystemFileLimitReached,
    #[error("not enough memory to create the segment")]
    OutOfMemory,
    #[error("unknown segment error")]
    Unknown,
}

impl SegmentError {
    /// Map an errno from `shm_open`/`ftruncate` to a segment error kind
    pub fn from_errno(errno: nix::errno::Errno) -> Self {
        use nix::errno::Errno;

        match errno {
            Errno::EACCES => SegmentError::InsufficientPermissions,
            Errno::EPERM => SegmentError::NoResizeSupport,
            Errno::EFBIG | Errno::EINVAL => SegmentError::RequestedMemoryExceedsMax,
            Errno::EBADF => SegmentError::InvalidDescriptor,
            Errno::EEXIST => SegmentError::AlreadyExists,
            Errno::EISDIR => SegmentError::PathIsDirectory,
            Errno::ELOOP => SegmentError::TooManySymbolicLinks,
            Errno::EMFILE => SegmentError::ProcessFileLimitReached,
            Errno::ENFILE => SegmentError::SystemFileLimitReached,
            Errno::ENOENT => SegmentError::DoesNotExist,
            Errno::ENOMEM => SegmentError::OutOfMemory,
            _ => SegmentError::Unknown,
        }
    }
}

/// Comprehensive error types for the Hermod broker runtime
#[derive(Debug, thiserror::Error)]
pub enum HermodError {
    /// I/O related errors (socket operations, mmap, etc.)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Shared-memory segment creation or teardown failure
    #[error("segment {name:?}: {kind}")]
    Segment { name: String, kind: SegmentError },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Every pool large enough for the request is exhausted, or the request
    /// exceeds the largest configured pool
    #[error("out of chunks: no pool can serve {requested} bytes")]
    OutOfChunks { requested: usize },

    /// A delivery queue under block policy is full
    #[error("delivery queue full")]
    QueueFull,

    /// Publish could not reach every matched subscriber
    #[error("publish blocked: {missed} full subscriber queue(s)")]
    Blocked { missed: usize },

    /// A live process already registered under this name
    #[error("process name already in use: {name}")]
    NameInUse { name: String },

    /// No live record for the given process name
    #[error("unknown process: {name}")]
    UnknownProcess { name: String },

    /// No port with the given identifier
    #[error("unknown port: {port_id}")]
    UnknownPort { port_id: u64 },

    /// Operation not permitted in the port's current state
    #[error("port state error: {message}")]
    PortState { message: String },

    /// Reference-count misuse (retain on a dead chunk, double release, overflow)
    #[error("chunk logic error: {message}")]
    ChunkLogic { message: String },

    /// Malformed or unparseable control message
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Control message with an operation this daemon does not know
    #[error("unknown control operation: {op}")]
    UnknownOperation { op: String },

    /// Broker configuration file errors
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl HermodError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create a segment error for the given name
    pub fn segment(name: impl Into<String>, kind: SegmentError) -> Self {
        Self::Segment {
            name: name.into(),
            kind,
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create an out-of-chunks error
    pub fn out_of_chunks(requested: usize) -> Self {
        Self::OutOfChunks { requested }
    }

    /// Create a name-in-use error
    pub fn name_in_use(name: impl Into<String>) -> Self {
        Self::NameInUse { name: name.into() }
    }

    /// Create an unknown-process error
    pub fn unknown_process(name: impl Into<String>) -> Self {
        Self::UnknownProcess { name: name.into() }
    }

    /// Create an unknown-port error
    pub fn unknown_port(port_id: u64) -> Self {
        Self::UnknownPort { port_id }
    }

    /// Create a port state error
    pub fn port_state(message: impl Into<String>) -> Self {
        Self::PortState {
            message: message.into(),
        }
    }

    /// Create a chunk logic error
    pub fn chunk_logic(message: impl Into<String>) -> Self {
        Self::ChunkLogic {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

// Convert from common error types
impl From<std::io::Error> for HermodError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

impl From<toml::de::Error> for HermodError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(format!("TOML parse error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = HermodError::out_of_chunks(4096);
        assert!(matches!(err, HermodError::OutOfChunks { requested: 4096 }));

        let err = HermodError::name_in_use("worker");
        assert!(matches!(err, HermodError::NameInUse { .. }));

        let err = HermodError::segment("", SegmentError::EmptyName);
        assert!(matches!(
            err,
            HermodError::Segment {
                kind: SegmentError::EmptyName,
                ..
            }
        ));
    }

    #[test]
    fn test_errno_mapping() {
        use nix::errno::Errno;

        assert_eq!(
            SegmentError::from_errno(Errno::EACCES),
            SegmentError::InsufficientPermissions
        );
        assert_eq!(
            SegmentError::from_errno(Errno::EEXIST),
            SegmentError::AlreadyExists
        );
        assert_eq!(
            SegmentError::from_errno(Errno::ENOENT),
            SegmentError::DoesNotExist
        );
        assert_eq!(
            SegmentError::from_errno(Errno::EOPNOTSUPP),
            SegmentError::Unknown
        );
    }

    #[test]
    fn test_error_display() {
        let err = HermodError::segment("/hermod_payload", SegmentError::AlreadyExists);
        let display = format!("{}", err);
        assert!(display.contains("/hermod_payload"));
        assert!(display.contains("already exists"));
    }
}
