use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;

use crate::{
    error::{DecodeError, EncodeError, TrackCodecError},
    reader::TrackReader,
    track::{TrackDescriptor, VERSION_1, VERSION_2, VERSION_3},
    writer::TrackWriter,
};

/// Bit 30 of the message header marks a payload that starts with a version byte.
const FLAG_VERSIONED: u32 = 1 << 30;
/// The low 30 bits of the header hold the payload length.
const SIZE_MASK: u32 = FLAG_VERSIONED - 1;

/// Encodes `track` into its base64 identifier.
///
/// The layout version is chosen from the populated optional fields, see
/// [`TrackDescriptor::version`].
pub fn encode(track: &TrackDescriptor) -> Result<String, EncodeError> {
    let bytes = encode_to_bytes(track)?;
    Ok(STANDARD.encode(bytes))
}

/// Encodes `track` into the raw message bytes (header included).
pub fn encode_to_bytes(track: &TrackDescriptor) -> Result<Bytes, EncodeError> {
    let version = track.version();
    let mut body = TrackWriter::with_capacity(64);

    if version > VERSION_1 {
        body.write_u8(version);
    }
    body.write_utf("title", &track.title)?;
    body.write_utf("author", &track.author)?;
    body.write_i64(track.length_ms);
    body.write_utf("identifier", &track.identifier)?;
    body.write_bool(track.is_seekable);
    body.write_bool(track.is_stream);
    if version >= VERSION_2 {
        body.write_optional_utf("uri", track.uri.as_deref())?;
    }
    if version >= VERSION_3 {
        body.write_optional_utf("artworkUrl", track.artwork_url.as_deref())?;
        body.write_optional_utf("isrc", track.isrc.as_deref())?;
    }
    body.write_utf("sourceName", &track.source_name)?;
    body.write_i64(track.position_ms);

    let len = body.len();
    let size = u32::try_from(len)
        .ok()
        .filter(|size| *size <= SIZE_MASK)
        .ok_or(EncodeError::PayloadTooLarge(len))?;
    let flags = if version > VERSION_1 { FLAG_VERSIONED } else { 0 };

    let mut message = TrackWriter::with_capacity(4 + len);
    message.write_u32(size | flags);
    message.write_slice(&body.into_bytes());
    Ok(message.into_bytes())
}

/// Decodes a base64 identifier back into a [`TrackDescriptor`].
pub fn decode(encoded: &str) -> Result<TrackDescriptor, DecodeError> {
    let raw = STANDARD.decode(encoded.trim())?;
    decode_bytes(Bytes::from(raw))
}

/// Decodes raw message bytes (header included).
pub fn decode_bytes(raw: Bytes) -> Result<TrackDescriptor, DecodeError> {
    let mut message = TrackReader::new(raw);
    let header = message.read_u32()?;
    let size = (header & SIZE_MASK) as usize;
    let payload = message.read_slice(size)?;
    let mut reader = TrackReader::new(payload);

    let version = if header & FLAG_VERSIONED != 0 {
        match reader.read_u8()? {
            v @ (VERSION_1 | VERSION_2 | VERSION_3) => v,
            other => return Err(DecodeError::UnsupportedVersion(other)),
        }
    } else {
        VERSION_1
    };

    let title = reader.read_utf()?;
    let author = reader.read_utf()?;
    let length_ms = reader.read_i64()?;
    let identifier = reader.read_utf()?;
    let is_seekable = reader.read_bool()?;
    let is_stream = reader.read_bool()?;
    let uri = if version >= VERSION_2 {
        reader.read_optional_utf()?
    } else {
        None
    };
    let (artwork_url, isrc) = if version >= VERSION_3 {
        (reader.read_optional_utf()?, reader.read_optional_utf()?)
    } else {
        (None, None)
    };
    let source_name = reader.read_utf()?;
    let position_ms = reader.read_i64()?;

    // Anything after the position belongs to source-specific extensions.
    Ok(TrackDescriptor {
        title,
        author,
        length_ms,
        identifier,
        is_seekable,
        is_stream,
        uri,
        artwork_url,
        isrc,
        source_name,
        position_ms,
    })
}

/// Stateless facade over [`encode`] and [`decode`] with a unified error type.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackCodec;

impl TrackCodec {
    pub fn encode(&self, track: &TrackDescriptor) -> Result<String, TrackCodecError> {
        Ok(encode(track)?)
    }

    pub fn decode(&self, encoded: &str) -> Result<TrackDescriptor, TrackCodecError> {
        Ok(decode(encoded)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V1_EXAMPLE: &str = "AAAAIwABQQABQgAAAAAAAAPoAANpZDEBAAAEaHR0cAAAAAAAAAAA";
    const V3_EXAMPLE: &str = "QAAAWgMABFNvbmcABkFydGlzdAAAAAAAAzwgAANhYmMBAAEAGWh0dHBzOi8vZXhhbXBsZS5jb20vdC9hYmMAAQAMVVNSQzE3NjA3ODM5AAZkZWV6ZXIAAAAAAAAAAA==";

    fn v1_track() -> TrackDescriptor {
        TrackDescriptor {
            title: "A".into(),
            author: "B".into(),
            length_ms: 1000,
            identifier: "id1".into(),
            is_seekable: true,
            is_stream: false,
            uri: None,
            artwork_url: None,
            isrc: None,
            source_name: "http".into(),
            position_ms: 0,
        }
    }

    fn v3_track() -> TrackDescriptor {
        TrackDescriptor {
            title: "Song".into(),
            author: "Artist".into(),
            length_ms: 212_000,
            identifier: "abc".into(),
            is_seekable: true,
            is_stream: false,
            uri: Some("https://example.com/t/abc".into()),
            artwork_url: None,
            isrc: Some("USRC17607839".into()),
            source_name: "deezer".into(),
            position_ms: 0,
        }
    }

    #[test]
    fn test_v1_example_payload() {
        let encoded = encode(&v1_track()).unwrap();
        assert_eq!(encoded, V1_EXAMPLE);

        let raw = STANDARD.decode(&encoded).unwrap();
        // Unversioned header, 35 bytes of payload.
        assert_eq!(&raw[..4], &[0x00, 0x00, 0x00, 0x23]);
        assert_eq!(raw.len(), 4 + 35);

        let decoded = decode(V1_EXAMPLE).unwrap();
        assert_eq!(decoded, v1_track());
        assert_eq!(decoded.uri, None);
        assert_eq!(decoded.artwork_url, None);
        assert_eq!(decoded.isrc, None);
    }

    #[test]
    fn test_v3_golden() {
        assert_eq!(encode(&v3_track()).unwrap(), V3_EXAMPLE);
        assert_eq!(decode(V3_EXAMPLE).unwrap(), v3_track());
    }

    #[test]
    fn test_round_trip_each_version() {
        let mut v2 = v1_track();
        v2.uri = Some("https://example.com/stream".into());
        v2.position_ms = 42_000;
        v2.title = "ünïcödé 🎵".into();

        let mut v3 = v2.clone();
        v3.artwork_url = Some("https://example.com/art.jpg".into());

        for track in [v1_track(), v2, v3] {
            let encoded = encode(&track).unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(decoded, track);
            assert_eq!(decoded.version(), track.version());
        }
    }

    #[test]
    fn test_versioned_header_flag() {
        let raw = encode_to_bytes(&v3_track()).unwrap();
        let header = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        assert_ne!(header & FLAG_VERSIONED, 0);
        assert_eq!((header & SIZE_MASK) as usize, raw.len() - 4);
        assert_eq!(raw[4], VERSION_3);
    }

    #[test]
    fn test_invalid_base64() {
        assert!(matches!(decode("not base64!!"), Err(DecodeError::Base64(_))));
    }

    #[test]
    fn test_truncated_input() {
        let raw = STANDARD.decode(V1_EXAMPLE).unwrap();
        for cut in [2, 4, 10, raw.len() - 1] {
            let truncated = STANDARD.encode(&raw[..cut]);
            assert!(
                matches!(decode(&truncated), Err(DecodeError::UnexpectedEof { .. })),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn test_header_length_beyond_payload() {
        let mut raw = STANDARD.decode(V1_EXAMPLE).unwrap();
        raw[3] = 0x7F;
        let err = decode(&STANDARD.encode(&raw)).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedEof { offset: 4, .. }));
    }

    #[test]
    fn test_unsupported_version() {
        let mut raw = STANDARD.decode(V3_EXAMPLE).unwrap();
        raw[4] = 9;
        assert_eq!(
            decode(&STANDARD.encode(&raw)).unwrap_err(),
            DecodeError::UnsupportedVersion(9)
        );
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        let mut raw = STANDARD.decode(V1_EXAMPLE).unwrap();
        raw.extend_from_slice(&[0xAA, 0xBB]);
        let mut header = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        header += 2;
        raw[..4].copy_from_slice(&header.to_be_bytes());

        assert_eq!(decode(&STANDARD.encode(&raw)).unwrap(), v1_track());
    }

    #[test]
    fn test_string_too_long() {
        let mut track = v1_track();
        track.author = "a".repeat(70_000);
        assert_eq!(
            encode(&track).unwrap_err(),
            EncodeError::StringTooLong {
                field: "author",
                len: 70_000
            }
        );
    }

    #[test]
    fn test_facade_wraps_errors() {
        let codec = TrackCodec;
        assert!(matches!(
            codec.decode("AAAA"),
            Err(TrackCodecError::Decode(_))
        ));
        let encoded = codec.encode(&v1_track()).unwrap();
        assert_eq!(codec.decode(&encoded).unwrap(), v1_track());
    }
}
