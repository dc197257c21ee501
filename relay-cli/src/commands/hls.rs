use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use relay_engine::hls::{HlsConfig, HlsVariantSelectionPolicy};
use relay_engine::{HlsError, SinkEvent, StreamReconstructor, Transport};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::cli::HlsArgs;
use crate::error::AppError;

fn parse_variant(variant: &str) -> Result<HlsVariantSelectionPolicy, AppError> {
    match variant.to_ascii_lowercase().as_str() {
        "highest" => Ok(HlsVariantSelectionPolicy::HighestBitrate),
        "lowest" => Ok(HlsVariantSelectionPolicy::LowestBitrate),
        "audio" => Ok(HlsVariantSelectionPolicy::AudioOnly),
        other => other
            .parse::<u64>()
            .map(HlsVariantSelectionPolicy::ClosestToBitrate)
            .map_err(|_| AppError::InvalidInput(format!("invalid variant '{variant}'"))),
    }
}

pub async fn run(transport: Arc<Transport>, args: HlsArgs) -> Result<(), AppError> {
    if args.concurrency == 0 {
        return Err(AppError::InvalidInput(
            "concurrency must be at least 1".to_string(),
        ));
    }

    let mut config = HlsConfig::default();
    config.playlist_config.variant_selection_policy = parse_variant(&args.variant)?;
    config.scheduler_config.download_concurrency = args.concurrency;
    config.fetcher_config.segment_download_timeout = Duration::from_secs(args.segment_timeout);

    let reconstructor = Arc::new(StreamReconstructor::new(transport, config));
    let mut reader = reconstructor.open(args.url.clone(), !args.no_decrypt);

    let mut writer: Box<dyn AsyncWrite + Unpin + Send> = match &args.output {
        Some(path) => Box::new(tokio::fs::File::create(path).await?),
        None => Box::new(tokio::io::stdout()),
    };

    let start_time = Instant::now();
    let mut total = 0u64;
    let mut failure: Option<HlsError> = None;

    loop {
        let event = tokio::select! {
            event = reader.next() => event,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping reconstruction");
                break;
            }
        };
        match event {
            Some(SinkEvent::Data(chunk)) => {
                total += chunk.len() as u64;
                writer.write_all(&chunk).await?;
            }
            Some(SinkEvent::FinishBuffering) => {
                info!(bytes = total, "All known segments written");
            }
            Some(SinkEvent::Error(e)) => failure = Some(e),
            None => break,
        }
    }
    writer.flush().await?;
    drop(reader);

    info!(
        bytes = total,
        elapsed = ?start_time.elapsed(),
        url = %args.url,
        "HLS reconstruction finished"
    );
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
