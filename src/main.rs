use std::sync::Arc;

use chatrelay::auth::provider_for;
use chatrelay::config::Config;
use chatrelay::llm::UpstreamClient;
use chatrelay::{Request, Server, app};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chatrelay=info")),
        )
        .init();

    let config = Config::from_env()?;
    info!(
        endpoint = %config.endpoint,
        deployment = %config.deployment,
        api_version = %config.api_version,
        "configuration loaded"
    );

    let http = reqwest::Client::builder().build()?;
    let tokens = provider_for(&config.credential, http.clone());
    let upstream = UpstreamClient::new(
        http,
        config.endpoint.as_str(),
        config.deployment.as_str(),
        config.api_version.as_str(),
        tokens,
    );
    let router = Arc::new(app::router(Arc::new(upstream), config.system_prompt.as_str()));

    let server = Server::bind(&config.bind_addr).await?;
    info!("open http://{} in a browser", server.local_addr());

    server
        .run_until_shutdown(
            move |req: Request| {
                let router = Arc::clone(&router);
                async move { router.handle(req).await }
            },
            shutdown_signal(),
        )
        .await?;

    info!("chatrelay stopped");
    Ok(())
}

/// Resolves on Ctrl-C. If the handler cannot be installed the server keeps
/// running.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}
