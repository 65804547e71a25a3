use function_router::config::RouterConfig;
use function_router::router::service::FunctionRouter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("function-router");

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        eprintln!(
            "Usage: {} [--http <addr:port>] [--control <addr:port>] [--data-host <ip>] \
             [--data-port-base <port>] [--scan-interval-ms <ms>] [--handshake-timeout-ms <ms>] \
             [--stats-interval-secs <secs>] [--verbose]",
            program
        );
        eprintln!("Example: {} --http 127.0.0.1:8080 --control 127.0.0.1:7000", program);
        std::process::exit(1);
    }

    let config = RouterConfig::from_args(args.get(1..).unwrap_or_default())?;

    tracing_subscriber::fmt()
        .with_max_level(if config.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    tracing::info!(
        "Starting router (http={}, control={}, data={}:{}+)",
        config.http_addr,
        config.control_addr,
        config.data_host,
        config.data_port_base
    );

    let router = FunctionRouter::new(config);
    let running = router.start().await?;

    tracing::info!(
        "Router ready: workers connect to {}, clients call http://{}/invoke/<function>",
        running.control_addr,
        running.http_addr
    );
    tracing::info!("Press Ctrl+C to shutdown");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    running.shutdown();

    Ok(())
}
