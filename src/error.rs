use thiserror::Error;

/// Everything that can go wrong decoding a blackbox log.
///
/// Header errors (`InvalidHeader`, `MalformedHeader`) are fatal to the
/// session being parsed. Payload errors (`MalformedEncoding`,
/// `UnexpectedEof`) only end iteration of the frame stream; they are never
/// returned from `frames()`/`events()` themselves, since a single bad frame
/// is recovered locally by resync (see `ResyncSkip` in the decoder).
#[derive(Debug, Error)]
pub enum BlackboxError {
    #[error("product signature not found at the requested log offset")]
    InvalidHeader,

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("malformed encoding: {0}")]
    MalformedEncoding(String),

    #[error("no such log: index {index} out of range (log_count = {log_count})")]
    NoSuchLog { index: u32, log_count: u32 },

    #[error("unexpected end of stream")]
    UnexpectedEof,
}

pub type Result<T> = std::result::Result<T, BlackboxError>;
