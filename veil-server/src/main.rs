//! Veil Broker Server

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use veil_server::args::Args;
use veil_server::broker::Broker;
use veil_server::connection::{self, ConnectionParams};
use veil_server::connection_tracker::{AdmissionResult, ConnectionTracker};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Print banner first
    println!("veild v{}", env!("CARGO_PKG_VERSION"));

    let config = args.broker_config();
    let debug = args.debug;
    let broker = Broker::new(&config, debug);

    // Connection tracking for DoS protection
    let connection_tracker = Arc::new(ConnectionTracker::new(
        config.max_connections,
        config.max_connections_per_origin,
    ));

    let addr = SocketAddr::new(args.bind, args.port);
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    println!("Listening on {}", addr);

    // Setup graceful shutdown handling
    let shutdown_signal = setup_shutdown_signal();

    tokio::select! {
        _ = shutdown_signal => {
            println!("Shutdown signal received");
        }
        // Accept loop
        _ = async {
            loop {
                match listener.accept().await {
                    Ok((socket, peer_addr)) => {
                        // Check connection limits before accepting
                        let connection_guard = match connection_tracker.try_admit(peer_addr.ip()) {
                            AdmissionResult::Admitted(guard) => guard,
                            AdmissionResult::RejectedGlobalLimit => {
                                if debug {
                                    eprintln!("Connection limit reached, rejecting {}", peer_addr.ip());
                                }
                                // Just drop the socket - client will see connection reset
                                continue;
                            }
                            AdmissionResult::RejectedOriginLimit => {
                                if debug {
                                    eprintln!("Per-origin limit reached, rejecting {}", peer_addr.ip());
                                }
                                continue;
                            }
                        };

                        let params = ConnectionParams {
                            peer_addr,
                            broker: broker.clone(),
                            debug,
                        };

                        // Spawn a new task to handle this connection
                        tokio::spawn(async move {
                            // Hold guard until connection ends to track active connections
                            let _guard = connection_guard;

                            if let Err(e) = connection::handle_connection(socket, params).await {
                                // Handshake failures are debug-only (scanners, plain HTTP probes)
                                if debug {
                                    eprintln!("Connection error from {}: {}", peer_addr, e);
                                }
                            }
                        });
                    }
                    Err(e) => {
                        eprintln!("Failed to accept connection: {}", e);
                    }
                }
            }
        } => {}
    }
}

/// Setup graceful shutdown signal handling (Ctrl+C)
async fn setup_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to register Ctrl+C handler");
    }
}
