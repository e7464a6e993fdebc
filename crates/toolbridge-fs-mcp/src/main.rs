//! Toolbridge filesystem provider
//!
//! Serves the workspace named by `TOOLBRIDGE_WORKSPACE_ROOT` as MCP tools over
//! stdio. Logs go to stderr so they never mix with protocol messages.

use rmcp::ServiceExt;
use toolbridge::{Config, Workspace};
use toolbridge_fs_mcp::FileManagerServer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = Config::from_env()?;
    let workspace = Workspace::open(&config.workspace_root)?;
    tracing::info!(root = %workspace.root().display(), "Starting filesystem MCP server");

    let server = FileManagerServer::new(workspace);
    let service = server
        .serve(rmcp::transport::stdio())
        .await
        .inspect_err(|e| {
            tracing::error!("Failed to start MCP service: {}", e);
        })?;

    service.waiting().await?;

    tracing::info!("Filesystem MCP server shutting down");
    Ok(())
}
