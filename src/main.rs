use clap::Parser;
use imgate::config::Config;
use imgate::gateway::ImageGateway;
use imgate::reload::ReloadManager;
use imgate::server::gateway_service;
use pingora_core::server::configuration::Opt;
use pingora_core::server::Server;
use std::path::PathBuf;
use std::sync::Arc;

/// Imgate - on-demand image optimization gateway built with Cloudflare's Pingora
#[derive(Parser, Debug)]
#[command(name = "imgate")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Daemon mode
    #[arg(short = 'd', long)]
    daemon: bool,

    /// Test configuration and exit
    #[arg(long)]
    test: bool,

    /// Upgrade workers gracefully
    #[arg(long)]
    upgrade: bool,
}

fn exit_with(message: &str, error: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", message, error);
    std::process::exit(1);
}

fn main() {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .unwrap_or_else(|e| exit_with("Failed to load configuration", e));
    if let Err(e) = config.validate() {
        exit_with("Invalid configuration", e);
    }

    if let Err(e) = imgate::logging::init_subscriber(&config.logging) {
        exit_with("Failed to initialize logging subsystem", e);
    }

    tracing::info!(
        config_file = %args.config.display(),
        server_address = %config.server.address,
        server_port = config.server.port,
        domains = config.policy.domains.len(),
        formats = ?config.images.formats,
        cache_max_size_mb = config.cache.max_size_mb,
        "Configuration loaded successfully"
    );

    let opt = Opt {
        daemon: args.daemon,
        test: args.test,
        upgrade: args.upgrade,
        ..Default::default()
    };

    let mut server =
        Server::new(Some(opt)).unwrap_or_else(|e| exit_with("Failed to create Pingora server", e));
    server.bootstrap();

    let gateway = Arc::new(
        ImageGateway::from_config(&config)
            .unwrap_or_else(|e| exit_with("Failed to build gateway", e)),
    );

    let reload_manager = Arc::new(ReloadManager::new(args.config.clone()));
    #[cfg(unix)]
    if let Err(e) = reload_manager.register_signal_handler() {
        tracing::warn!(error = %e, "Hot reload disabled");
    }
    reload_manager.spawn_watcher(gateway.clone());

    let service = gateway_service(gateway, &config.server);

    tracing::info!(
        address = %config.server.listen_addr(),
        threads = config.server.threads,
        "Starting imgate"
    );

    server.add_service(service);

    // Run server forever (blocks until shutdown)
    server.run_forever();
}
