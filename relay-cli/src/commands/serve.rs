use std::sync::Arc;

use relay_engine::RoutePlanner;
use relay_engine::admin;
use tokio::net::TcpListener;
use tracing::info;

use crate::cli::ServeArgs;
use crate::error::AppError;

pub async fn run(planner: Arc<RoutePlanner>, args: ServeArgs) -> Result<(), AppError> {
    let listener = TcpListener::bind(&args.bind).await?;
    info!(address = %listener.local_addr()?, "Admin API listening");

    axum::serve(listener, admin::router(planner))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down admin API");
        })
        .await?;
    Ok(())
}
