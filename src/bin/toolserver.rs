use std::sync::Arc;

use pdfqa::core::config::{AppPaths, Settings};
use pdfqa::core::logging;
use pdfqa::mcp::server;
use pdfqa::mcp::service::ToolService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = AppPaths::new();
    logging::init_toolserver(&paths);

    let settings = Settings::from_env();
    tracing::info!(
        server_name = %settings.mcp_server_name,
        embedding_model = %settings.embedding_model_id,
        "tool server starting"
    );

    let server_name = settings.mcp_server_name.clone();
    let service = Arc::new(ToolService::new(settings, &paths)?);
    server::serve(service, &server_name).await
}
