//! Snapshot codec errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input at offset {offset}: needed {needed} more bytes")]
    UnexpectedEof { offset: usize, needed: usize },

    #[error("invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("not a snapshot: bad magic bytes")]
    BadMagic,

    #[error("unsupported snapshot format version {0}")]
    UnsupportedVersion(i64),

    #[error("unknown value tag {0}")]
    UnknownValueTag(i64),

    #[error("no decoder registered for node extension '{0}'")]
    UnknownExtension(String),

    #[error("nesting deeper than {0} levels")]
    DepthExceeded(usize),

    #[error("collection length {len} exceeds limit {max}")]
    LengthExceeded { len: u64, max: usize },

    #[error("varint at offset {0} is too long")]
    VarintOverflow(usize),

    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("{0} trailing bytes after snapshot")]
    TrailingBytes(usize),
}

impl CodecError {
    pub fn invalid(field: &'static str, value: impl ToString) -> Self {
        Self::InvalidField {
            field,
            value: value.to_string(),
        }
    }
}

pub type CodecResult<T> = Result<T, CodecError>;
