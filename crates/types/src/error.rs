//! Domain error types.

use pqledger_crypto::CryptoError;
use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors from the deterministic wire codec.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The output buffer cannot hold the serialized object.
    #[error("serialization buffer too small")]
    BufferTooSmall,
    /// The input buffer ended before the object was complete.
    #[error("unexpected end of input")]
    UnexpectedEnd,
    /// A field that must be set before serialization is still unset.
    #[error("required field is not set: {0}")]
    MissingField(&'static str),
    /// A decoded value violates a structural constraint.
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// The envelope checksum did not match the message bytes.
    #[error("message checksum mismatch")]
    ChecksumMismatch,
    /// A cryptographic operation inside serialization or hashing failed.
    #[error("cryptographic failure: {0}")]
    Crypto(String),
}

impl From<CryptoError> for CodecError {
    fn from(e: CryptoError) -> Self {
        CodecError::Crypto(e.to_string())
    }
}

impl ErrorCode for CodecError {
    fn code(&self) -> &'static str {
        match self {
            Self::BufferTooSmall => "CODEC_BUFFER_TOO_SMALL",
            Self::UnexpectedEnd => "CODEC_UNEXPECTED_END",
            Self::MissingField(_) => "CODEC_MISSING_FIELD",
            Self::InvalidValue(_) => "CODEC_INVALID_VALUE",
            Self::ChecksumMismatch => "CODEC_CHECKSUM_MISMATCH",
            Self::Crypto(_) => "CODEC_CRYPTO_FAILURE",
        }
    }
}

/// Errors from the persistent stores.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The backing engine refused an operation.
    #[error("storage backend error: {0}")]
    Backend(String),
    /// The requested key was not found.
    #[error("key not found in store")]
    NotFound,
    /// A stored value failed to decode.
    #[error("stored value failed to decode: {0}")]
    Decode(#[from] CodecError),
}

impl ErrorCode for StorageError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "STORAGE_BACKEND_ERROR",
            Self::NotFound => "STORAGE_KEY_NOT_FOUND",
            Self::Decode(_) => "STORAGE_DECODE_ERROR",
        }
    }
}

/// Errors from the block-header chain tree.
#[derive(Error, Debug)]
pub enum ChainError {
    /// An inserted header references a parent this node has never seen.
    #[error("parent block is unknown: {0}")]
    UnknownParent(String),
    /// The named block is not present in the tree.
    #[error("block is unknown: {0}")]
    UnknownBlock(String),
    /// Hashing or encoding a header failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl ErrorCode for ChainError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownParent(_) => "CHAIN_UNKNOWN_PARENT",
            Self::UnknownBlock(_) => "CHAIN_UNKNOWN_BLOCK",
            Self::Codec(_) => "CHAIN_CODEC_ERROR",
        }
    }
}

/// Errors from the consensus engine.
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// An error occurred while reading or writing a store.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    /// An error occurred while encoding or hashing an object.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// A cryptographic operation failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    /// A chain-tree operation failed.
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
    /// An inbound proposal was structurally invalid and was discarded.
    #[error("invalid proposal: {0}")]
    InvalidProposal(String),
    /// The engine could not start or keep one of its workers.
    #[error("internal consensus error: {0}")]
    Internal(String),
}

impl ErrorCode for ConsensusError {
    fn code(&self) -> &'static str {
        match self {
            Self::Storage(_) => "CONSENSUS_STORAGE_ERROR",
            Self::Codec(_) => "CONSENSUS_CODEC_ERROR",
            Self::Crypto(_) => "CONSENSUS_CRYPTO_ERROR",
            Self::Chain(_) => "CONSENSUS_CHAIN_ERROR",
            Self::InvalidProposal(_) => "CONSENSUS_INVALID_PROPOSAL",
            Self::Internal(_) => "CONSENSUS_INTERNAL_ERROR",
        }
    }
}

/// Errors from the connection manager and wire protocol.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// A socket operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A frame failed to decode.
    #[error("frame decode error: {0}")]
    Decode(#[from] CodecError),
    /// The framing marker did not match; the stream is desynchronized.
    #[error("bad framing magic")]
    BadMagic,
    /// A frame advertised a payload larger than the protocol maximum.
    #[error("oversized frame: {size} bytes")]
    Oversize { size: u32 },
    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,
    /// An internal channel was closed during shutdown.
    #[error("channel closed")]
    ChannelClosed,
}

impl ErrorCode for NetworkError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "NET_IO_ERROR",
            Self::Decode(_) => "NET_DECODE_ERROR",
            Self::BadMagic => "NET_BAD_MAGIC",
            Self::Oversize { .. } => "NET_OVERSIZED_FRAME",
            Self::ConnectionClosed => "NET_CONNECTION_CLOSED",
            Self::ChannelClosed => "NET_CHANNEL_CLOSED",
        }
    }
}

impl ErrorCode for CryptoError {
    fn code(&self) -> &'static str {
        match self {
            CryptoError::VerificationFailed => "CRYPTO_VERIFICATION_FAILED",
            CryptoError::InvalidKey(_) => "CRYPTO_INVALID_KEY",
            CryptoError::InvalidSignature(_) => "CRYPTO_INVALID_SIGNATURE",
            CryptoError::InvalidHashLength { .. } => "CRYPTO_INVALID_HASH_LENGTH",
            CryptoError::OperationFailed(_) => "CRYPTO_OPERATION_FAILED",
            CryptoError::Unsupported(_) => "CRYPTO_UNSUPPORTED",
        }
    }
}
