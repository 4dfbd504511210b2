//! Strand invoker server.
//!
//! Serves the function named by `STRAND_FUNCTION_URI`, for example
//! `file:///functions/libdemo_functions.so?handler=StringInStringOut`.

use strand::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting strand invoker...");

    let config = InvokerConfig::from_env()?;
    let uri = config.require_function_uri()?;

    // Resolution failures are fatal
    let invoker = Invoker::from_uri(uri)?;

    tracing::info!("Streaming calls: POST http://{}/stream", config.bind_addr());
    tracing::info!("Single calls: POST http://{}/", config.bind_addr());
    if config.enable_health {
        tracing::info!("Health check: GET http://{}/_health", config.bind_addr());
    }

    InvokerServer::new(config, invoker).run().await
}
