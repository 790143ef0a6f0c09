/// Stageline server entry point
///
/// Reads `STAGELINE_*` environment configuration and serves:
/// - Process config API at /process_configs
/// - Workflow API at /workflows
/// - Subscription API at /subscriptions
/// - Health check at /healthz

use stageline::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
