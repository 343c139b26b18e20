use thiserror::Error;

use graph_pack_buffers::BufferError;

/// Error type for encoding/decoding operations.
#[derive(Debug, Error)]
pub enum PackError {
    #[error("unexpected end of stream")]
    EndOfStream,
    #[error("malformed tag {0} in field context")]
    MalformedTag(i8),
    #[error("unresolved handle at position {0}")]
    UnresolvedHandle(usize),
    #[error("unknown class code {0}")]
    UnknownClass(i32),
    #[error("class '{0}' is not registered")]
    UnregisteredClass(String),
    #[error("failed to instantiate '{0}'; register a serializer implementing instantiate")]
    InstantiationFailed(String),
    #[error("illegal field access: {0}")]
    IllegalFieldAccess(String),
    #[error("value does not match field type: {0}")]
    TypeMismatch(String),
    #[error("malformed string payload")]
    MalformedString,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BufferError> for PackError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::EndOfBuffer => PackError::EndOfStream,
            BufferError::EmptyCursorStack => {
                PackError::IllegalFieldAccess("cursor stack underflow".to_string())
            }
        }
    }
}
