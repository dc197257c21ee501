use std::io::Read;

use track_codec::{TrackCodec, TrackDescriptor};
use tracing::debug;

use crate::cli::TrackCommand;
use crate::error::AppError;

pub fn run(command: TrackCommand) -> Result<(), AppError> {
    let codec = TrackCodec;
    match command {
        TrackCommand::Decode { encoded } => {
            let track = codec.decode(&encoded)?;
            debug!(version = track.version(), "Decoded track");
            println!("{}", serde_json::to_string_pretty(&track)?);
        }
        TrackCommand::Encode { json } => {
            let json = match json {
                Some(json) => json,
                None => {
                    let mut buffer = String::new();
                    std::io::stdin().read_to_string(&mut buffer)?;
                    buffer
                }
            };
            let track: TrackDescriptor = serde_json::from_str(&json)?;
            println!("{}", codec.encode(&track)?);
        }
    }
    Ok(())
}
