use std::fmt;

/// Convenience result alias for fallible operations in this stack.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Failures while decoding or encoding a protocol element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodingErrorKind {
    /// Block option value is longer than three bytes.
    BlockOptionLength,
    /// Block number does not fit the 20-bit NUM field.
    BlockNumberRange,
}

impl fmt::Display for DecodingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodingErrorKind::BlockOptionLength => {
                write!(f, "block option value exceeds three bytes")
            }
            DecodingErrorKind::BlockNumberRange => {
                write!(f, "block number does not fit the NUM field")
            }
        }
    }
}

/// Failures of a blockwise transfer after it has been set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferErrorKind {
    /// Peer sent a block out of sequence.
    WrongBlockNumber,
    /// Content-Format changed between blocks of one transfer.
    ContentFormatMismatch,
    /// Assembled body would exceed the configured buffer size.
    BodyTooLarge,
    /// Declared Size1 exceeds the reassembly cap.
    RequestBodyTooLarge,
    /// A block beyond the end of the body was requested.
    UnknownBlock,
    /// Resource implementation returned a different block than requested.
    ResourceMismatch,
    /// Transfer idled past its cleanup deadline.
    Timeout,
    /// A newer transfer for the same key replaced this one.
    Preempted,
    /// No free slot left in the transfer registry.
    RegistryFull,
    /// The tracker was driven in the wrong direction, for example asking an
    /// inbound assembly tracker to produce an outbound block.
    WrongOrientation,
}

impl fmt::Display for TransferErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferErrorKind::WrongBlockNumber => write!(f, "wrong block number"),
            TransferErrorKind::ContentFormatMismatch => write!(f, "unexpected Content-Format"),
            TransferErrorKind::BodyTooLarge => write!(f, "body exceeded expected size"),
            TransferErrorKind::RequestBodyTooLarge => {
                write!(f, "declared request body exceeds the reassembly cap")
            }
            TransferErrorKind::UnknownBlock => write!(f, "requested block is beyond the body"),
            TransferErrorKind::ResourceMismatch => {
                write!(f, "resource returned a different block than requested")
            }
            TransferErrorKind::Timeout => write!(f, "transfer timed out"),
            TransferErrorKind::Preempted => write!(f, "transfer preempted by a newer one"),
            TransferErrorKind::RegistryFull => write!(f, "transfer registry is full"),
            TransferErrorKind::WrongOrientation => {
                write!(f, "transfer tracker driven in the wrong direction")
            }
        }
    }
}

/// Top-level error type of the blockwise stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Failed to decode or encode a protocol element.
    DecodingError(DecodingErrorKind),
    /// A blockwise transfer violated the protocol or ran out of resources.
    TransferError(TransferErrorKind),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::DecodingError(kind) => write!(f, "decoding error: {}", kind),
            ErrorKind::TransferError(kind) => write!(f, "transfer error: {}", kind),
        }
    }
}

impl std::error::Error for ErrorKind {}

impl From<DecodingErrorKind> for ErrorKind {
    fn from(kind: DecodingErrorKind) -> Self {
        ErrorKind::DecodingError(kind)
    }
}

impl From<TransferErrorKind> for ErrorKind {
    fn from(kind: TransferErrorKind) -> Self {
        ErrorKind::TransferError(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind() {
        let err = ErrorKind::TransferError(TransferErrorKind::WrongBlockNumber);
        assert_eq!(err.to_string(), "transfer error: wrong block number");

        let err = ErrorKind::DecodingError(DecodingErrorKind::BlockOptionLength);
        assert!(err.to_string().contains("three bytes"));
    }

    #[test]
    fn test_from_nested_kinds() {
        let err: ErrorKind = TransferErrorKind::BodyTooLarge.into();
        assert_eq!(err, ErrorKind::TransferError(TransferErrorKind::BodyTooLarge));
    }
}
