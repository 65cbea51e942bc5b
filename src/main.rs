//! socksbind - SOCKS5 BIND Proxy
//!
//! This is the main entry point for the proxy server.
//! It sets up the TCP listener, the BIND port binder, and handles incoming connections.

use socksbind::allocator::{BinderConfig, InboundConnection, PortBinder, DEFAULT_ACCEPT_TIMEOUT};
use socksbind::commands::BindCommandHandler;
use socksbind::connection::{handle_connection, ConnectionStats};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Server configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Interface BIND listeners are opened on
    bind_host: IpAddr,
    /// How long a BIND listener waits for its peer
    accept_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: socksbind::DEFAULT_HOST.to_string(),
            port: socksbind::DEFAULT_PORT,
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = required_value(&args, i, "--host").to_string();
                    i += 2;
                }
                "--port" | "-p" => {
                    config.port = required_value(&args, i, "--port")
                        .parse()
                        .unwrap_or_else(|_| {
                            eprintln!("Error: invalid port number");
                            std::process::exit(1);
                        });
                    i += 2;
                }
                "--bind-host" => {
                    config.bind_host = required_value(&args, i, "--bind-host")
                        .parse()
                        .unwrap_or_else(|_| {
                            eprintln!("Error: --bind-host must be an IP address");
                            std::process::exit(1);
                        });
                    i += 2;
                }
                "--accept-timeout" => {
                    let secs: u64 = required_value(&args, i, "--accept-timeout")
                        .parse()
                        .unwrap_or_else(|_| {
                            eprintln!("Error: invalid accept timeout");
                            std::process::exit(1);
                        });
                    config.accept_timeout = Duration::from_secs(secs);
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("socksbind version {}", socksbind::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    /// Returns the listen address as a string
    fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn required_value<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"
socksbind - SOCKS5 BIND Proxy

USAGE:
    socksbind [OPTIONS]

OPTIONS:
    -h, --host <HOST>              Host to listen on (default: 127.0.0.1)
    -p, --port <PORT>              Port to listen on (default: 1080)
        --bind-host <IP>           Interface for BIND listeners (default: 0.0.0.0)
        --accept-timeout <SECS>    How long a BIND listener waits (default: 60)
    -v, --version                  Print version information
        --help                     Print this help message

EXAMPLES:
    socksbind                          # Start on 127.0.0.1:1080
    socksbind --port 1081              # Start on port 1081
    socksbind --accept-timeout 10      # Give up on BIND peers after 10s
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging; RUST_LOG overrides the default level
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!(version = socksbind::VERSION, "socksbind starting");

    // One acceptor per BIND request, all sharing this binder
    let (binder, inbound) = PortBinder::tcp(BinderConfig {
        bind_ip: config.bind_host,
        accept_timeout: config.accept_timeout,
    });
    info!(
        bind_host = %config.bind_host,
        accept_timeout_secs = config.accept_timeout.as_secs(),
        "BIND port binder ready"
    );
    tokio::spawn(drain_inbound(inbound));

    let bind_handler = BindCommandHandler::new(Arc::new(binder));

    // Create connection statistics
    let stats = Arc::new(ConnectionStats::new());

    // Bind the TCP listener
    let listener = TcpListener::bind(config.listen_address()).await?;
    info!("Listening on {}", config.listen_address());

    // Set up graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Shutdown signal received, stopping server...");
    };

    // Main accept loop
    tokio::select! {
        _ = accept_loop(listener, bind_handler, stats) => {}
        _ = shutdown => {}
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Main loop that accepts incoming connections
async fn accept_loop(
    listener: TcpListener,
    bind_handler: BindCommandHandler<PortBinder>,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let bind_handler = bind_handler.clone();
                let stats = Arc::clone(&stats);

                tokio::spawn(async move {
                    handle_connection(stream, addr, bind_handler, stats).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Consumes connections that arrived on BIND listeners.
///
/// Relaying data is outside this server; connections are logged and closed.
async fn drain_inbound(mut inbound: mpsc::UnboundedReceiver<InboundConnection<TcpStream>>) {
    while let Some(connection) = inbound.recv().await {
        info!(
            destination = %connection.target,
            peer = %connection.peer_addr,
            "Inbound BIND connection received"
        );
    }
}
