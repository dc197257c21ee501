use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] relay_engine::TransportError),

    #[error("Route planner error: {0}")]
    RoutePlanner(#[from] relay_engine::RoutePlannerError),

    #[error("HLS error: {0}")]
    Hls(#[from] relay_engine::HlsError),

    #[error("Track codec error: {0}")]
    Track(#[from] track_codec::TrackCodecError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),
}
