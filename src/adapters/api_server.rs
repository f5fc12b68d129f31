use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::api::{create_router, AppState};
use crate::config::AppConfig;
use crate::error::Result;
use crate::strategy::Executor;

/// Serve the webhook API until `shutdown` resolves.
///
/// In-flight requests are allowed to finish; an order already sent to the
/// exchange is never abandoned by shutdown.
pub async fn start_api_server<F>(
    executor: Arc<Executor>,
    config: Arc<AppConfig>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let port = config.server.port;
    let app = create_router(AppState::new(executor, config));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("API server listening on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("API server stopped");
    Ok(())
}
