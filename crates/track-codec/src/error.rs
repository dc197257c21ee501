use thiserror::Error;

/// Any failure produced by the track codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackCodecError {
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Programmer errors detected while writing a track.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("field `{field}` is {len} bytes long, the limit is 65535")]
    StringTooLong { field: &'static str, len: usize },

    #[error("encoded payload of {0} bytes does not fit in the message header")]
    PayloadTooLarge(usize),
}

/// Malformed or unsupported input while reading a track.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("unexpected end of input at offset {offset}: needed {needed} bytes, {remaining} left")]
    UnexpectedEof {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("string at offset {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: usize },

    #[error("unsupported track version: {0}")]
    UnsupportedVersion(u8),
}
