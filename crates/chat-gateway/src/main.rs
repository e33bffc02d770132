//! Chat Gateway binary.

use chat_gateway::config::GatewayConfig;
use chat_gateway::server::{self, AppState};

fn main() -> anyhow::Result<()> {
    // Determine config path
    let config_path = {
        let args: Vec<String> = std::env::args().collect();
        // Check for --config flag first
        args.iter()
            .position(|a| a == "--config")
            .and_then(|i| args.get(i + 1).cloned())
            // Fall back to positional arg
            .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
            .or_else(|| std::env::var("CHAT_GATEWAY_CONFIG").ok())
            .unwrap_or_else(|| "chat-gateway.toml".to_string())
    };

    // Fail before anything starts if required settings are missing
    let config = GatewayConfig::load(&config_path)?;

    // Build the tokio runtime first: the tonic gRPC exporter needs a reactor context
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        // OTLP export is optional and falls back to local logging only
        let tracing_guard = gateway_tracing::init_tracing(&config.tracing);

        tracing::info!(
            config_path = %config_path,
            listen_address = %config.server.listen_address,
            upstream_base = %config.upstream.base_url,
            max_connections = config.upstream.max_connections,
            federated_headers = config.auth.federated.trust_forwarded_headers,
            dashboard_login = config.auth.dashboard_email.is_some(),
            otlp_export = tracing_guard.exporting(),
            "Starting chat-gateway"
        );

        let state = AppState::from_config(config)?;
        let result = server::run(state).await;
        drop(tracing_guard);
        result
    })
}
