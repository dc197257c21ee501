use std::str::FromStr;

use futures::StreamExt;
use relay_engine::{RequestBody, RequestOptions, Transport};
use reqwest::Method;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::info;

use crate::cli::FetchArgs;
use crate::error::AppError;

pub async fn run(transport: &Transport, args: FetchArgs) -> Result<(), AppError> {
    let method = Method::from_str(&args.method.to_ascii_uppercase())
        .map_err(|_| AppError::InvalidInput(format!("invalid method '{}'", args.method)))?;

    let body = match args.data {
        Some(data) if args.json => {
            let value: serde_json::Value = serde_json::from_str(&data)?;
            RequestBody::Json(value)
        }
        Some(data) => RequestBody::Text(data),
        None => RequestBody::Empty,
    };

    let mut options = RequestOptions::get()
        .with_method(method)
        .with_body(body)
        .with_max_redirects(args.max_redirects)
        .streaming();
    if args.no_compress {
        options = options.without_body_compression();
    }

    let response = transport.request(&args.url, options).await?;
    info!(
        status = response.status.as_u16(),
        version = ?response.version,
        url = %response.url,
        "Response received"
    );

    let mut writer: Box<dyn AsyncWrite + Unpin + Send> = match &args.output {
        Some(path) => Box::new(tokio::fs::File::create(path).await?),
        None => Box::new(tokio::io::stdout()),
    };

    let mut total = 0u64;
    let mut stream = response.into_io_stream().boxed();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        total += chunk.len() as u64;
        writer.write_all(&chunk).await?;
    }
    writer.flush().await?;
    info!(bytes = total, "Body written");
    Ok(())
}
