//! Shared error types across gtproxy crates.

use thiserror::Error;

/// Codec layer that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// Raw cursor reads/writes.
    Buffer,
    /// Outer `NetPacket` envelope (type tag).
    Envelope,
    /// Tank sub-protocol.
    Tank,
    /// `Variant` value list.
    Variant,
    /// Extension binary frame.
    Frame,
}

impl Layer {
    /// Stable label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Layer::Buffer => "buffer",
            Layer::Envelope => "envelope",
            Layer::Tank => "tank",
            Layer::Variant => "variant",
            Layer::Frame => "frame",
        }
    }
}

/// Error raised while decoding or encoding wire bytes.
///
/// Always scoped to a single message: callers log it and drop the offending
/// packet, never the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("read past end of buffer (need {need}, have {have})")]
    Eof { need: usize, have: usize },
    #[error("{len} bytes do not fit a length prefix of at most {max}")]
    PrefixOverflow { len: usize, max: usize },
    #[error("type tag needs 4 bytes, got {len}")]
    MalformedTypeTag { len: usize },
    #[error("unknown net packet type {0}")]
    UnknownType(u32),
    #[error("unknown tank packet type {0}")]
    UnknownTankType(u8),
    #[error("tank struct truncated (need {need}, have {have})")]
    TruncatedStruct { need: usize, have: usize },
    #[error("extended data length mismatch (declared {declared}, actual {actual})")]
    ExtendedLenMismatch { declared: usize, actual: usize },
    #[error("extended data truncated (declared {declared}, actual {actual})")]
    TruncatedExtendedData { declared: usize, actual: usize },
    #[error("{len} bytes of extended data without the EXTENDED flag")]
    ExtendedDataWithoutFlag { len: usize },
    #[error("variant holds {0} values, at most 255 are addressable")]
    TooManyValues(usize),
    #[error("unknown variant kind {0}")]
    UnknownVariantKind(u8),
    #[error("bad extension frame: {0}")]
    BadFrame(&'static str),
    #[error("unsupported frame version {0}")]
    UnsupportedVersion(u8),
}

impl CodecError {
    /// Which layer of the codec failed.
    pub fn layer(&self) -> Layer {
        match self {
            CodecError::Eof { .. } | CodecError::PrefixOverflow { .. } => Layer::Buffer,
            CodecError::MalformedTypeTag { .. } | CodecError::UnknownType(_) => Layer::Envelope,
            CodecError::UnknownTankType(_)
            | CodecError::TruncatedStruct { .. }
            | CodecError::ExtendedLenMismatch { .. }
            | CodecError::TruncatedExtendedData { .. }
            | CodecError::ExtendedDataWithoutFlag { .. } => Layer::Tank,
            CodecError::TooManyValues(_) | CodecError::UnknownVariantKind(_) => Layer::Variant,
            CodecError::BadFrame(_) | CodecError::UnsupportedVersion(_) => Layer::Frame,
        }
    }
}

/// Stable error codes sent to extensions on the control lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed message or frame.
    BadRequest,
    /// Identity not registered (handshake incomplete).
    UnknownExtension,
    /// Directive for a chain that does not exist or is not held by the sender.
    NotChainHolder,
    /// Unsupported protocol version.
    UnsupportedVersion,
    /// Internal broker error.
    Internal,
}

impl ErrorCode {
    /// String representation used in JSON control messages.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::UnknownExtension => "UNKNOWN_EXTENSION",
            ErrorCode::NotChainHolder => "NOT_CHAIN_HOLDER",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Unified error type used by core and broker.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("codec ({}): {0}", .0.layer().as_str())]
    Codec(#[from] CodecError),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unknown extension: {0}")]
    UnknownExtension(String),
    #[error("unknown chain {0}")]
    UnknownChain(u64),
    #[error("extension {ext} does not hold chain {chain}")]
    NotChainHolder { ext: String, chain: u64 },
    #[error("extension gone: {0}")]
    ExtensionGone(String),
    #[error("unsupported protocol version")]
    UnsupportedVersion,
    #[error("internal: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Map internal error to a stable extension-facing code.
    pub fn code(&self) -> ErrorCode {
        match self {
            ProxyError::Codec(CodecError::UnsupportedVersion(_)) => ErrorCode::UnsupportedVersion,
            ProxyError::Codec(_) | ProxyError::BadRequest(_) => ErrorCode::BadRequest,
            ProxyError::UnknownExtension(_) | ProxyError::ExtensionGone(_) => {
                ErrorCode::UnknownExtension
            }
            ProxyError::UnknownChain(_) | ProxyError::NotChainHolder { .. } => {
                ErrorCode::NotChainHolder
            }
            ProxyError::UnsupportedVersion => ErrorCode::UnsupportedVersion,
            ProxyError::Internal(_) => ErrorCode::Internal,
        }
    }
}
