//! Encoder and decoder for compact, versioned track identifiers.
//!
//! The binary layout matches the Lavalink message format so identifiers can be
//! exchanged with other players speaking that protocol.

pub mod codec;
pub mod error;
pub mod reader;
pub mod track;
pub mod writer;

pub use crate::{
    codec::{TrackCodec, decode, decode_bytes, encode, encode_to_bytes},
    error::{DecodeError, EncodeError, TrackCodecError},
    reader::TrackReader,
    track::TrackDescriptor,
    writer::TrackWriter,
};
