use serde::{Deserialize, Serialize};

/// Oldest layout: no optional fields.
pub const VERSION_1: u8 = 1;
/// Adds the optional `uri`.
pub const VERSION_2: u8 = 2;
/// Adds the optional `artworkUrl` and `isrc`.
pub const VERSION_3: u8 = 3;

/// Metadata describing a playable track.
///
/// Serializes with camelCase names, the `info` object shape used by
/// Lavalink-protocol clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackDescriptor {
    pub title: String,
    pub author: String,
    #[serde(rename = "length")]
    pub length_ms: i64,
    pub identifier: String,
    pub is_seekable: bool,
    pub is_stream: bool,
    pub uri: Option<String>,
    pub artwork_url: Option<String>,
    pub isrc: Option<String>,
    pub source_name: String,
    #[serde(rename = "position")]
    pub position_ms: i64,
}

impl TrackDescriptor {
    /// The smallest layout version able to carry every populated field.
    pub fn version(&self) -> u8 {
        if self.artwork_url.is_some() || self.isrc.is_some() {
            VERSION_3
        } else if self.uri.is_some() {
            VERSION_2
        } else {
            VERSION_1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> TrackDescriptor {
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

    #[test]
    fn test_version_follows_optional_fields() {
        let mut track = base();
        assert_eq!(track.version(), VERSION_1);

        track.uri = Some("https://example.com".into());
        assert_eq!(track.version(), VERSION_2);

        track.uri = None;
        track.isrc = Some("USRC17607839".into());
        assert_eq!(track.version(), VERSION_3);

        track.isrc = None;
        track.artwork_url = Some("https://example.com/a.jpg".into());
        assert_eq!(track.version(), VERSION_3);
    }

    #[test]
    fn test_json_shape() {
        let value = serde_json::to_value(base()).unwrap();
        assert_eq!(value["length"], 1000);
        assert_eq!(value["isSeekable"], true);
        assert_eq!(value["sourceName"], "http");
        assert!(value["artworkUrl"].is_null());
        assert_eq!(value["position"], 0);
    }
}
