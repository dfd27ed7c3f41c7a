//! Loom
//!
//! Serves the demo context over WebSocket, and talks to a running server from
//! the command line.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use figment::providers::Serialized;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use loom::config::LoomConfig;
use loom::demo::Demo;
use loom_client::{Client, connect};
use loom_runtime::Registry;
use loom_server::{AppState, Bridge, create_router};
use loom_types::Value;

/// Live model bridge between backend objects and a browser UI
#[derive(Parser, Debug)]
#[command(name = "loom", version)]
#[command(about = "Live model bridge between backend objects and a browser UI", long_about = None)]
struct Args {
    /// Path to the configuration file (default: ./loom.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bridge server URL for client commands (default: derived from config)
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the demo context (fred and wilma) over WebSocket
    Serve {
        /// Server host address
        #[arg(long)]
        host: Option<String>,

        /// Server port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Read an attribute
    Get { name: String, attribute: String },

    /// Assign an attribute; the value is JSON, or a plain string
    Set {
        name: String,
        attribute: String,
        value: String,
    },

    /// Invoke a method; each argument is JSON, or a plain string
    Call {
        name: String,
        method: String,
        args: Vec<String>,
    },

    /// Print change notifications for a context object until interrupted
    Watch { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut figment = LoomConfig::figment(args.config.as_deref())?;
    if let Command::Serve { host, port } = &args.command {
        if let Some(host) = host {
            figment = figment.merge(Serialized::default("server.host", host));
        }
        if let Some(port) = port {
            figment = figment.merge(Serialized::default("server.port", port));
        }
    }
    let config: LoomConfig = figment.extract().context("invalid configuration")?;

    loom::logging::init(&config.log)?;

    match args.command {
        Command::Serve { .. } => serve(&config).await,
        command => {
            let url = args.url.unwrap_or_else(|| config.server.ws_url());
            let client = connect(&url, config.client.clone())
                .await
                .with_context(|| format!("could not reach bridge server at {url}"))?;
            let outcome = run_client_command(&client, command).await;
            client.disconnect();
            outcome
        }
    }
}

async fn serve(config: &LoomConfig) -> Result<()> {
    info!("Starting Loom server v{}", env!("CARGO_PKG_VERSION"));

    let registry = Arc::new(Registry::with_separator(config.bridge.name_separator.clone()));
    let bridge = Bridge::new(registry);

    // The bridge holds weak references only
    let demo = Demo::new();
    demo.expose(&bridge)?;

    let app = create_router(AppState::new(bridge.clone()));

    let addr: SocketAddr = config
        .server
        .bind_addr()
        .parse()
        .with_context(|| format!("invalid server address {}", config.server.bind_addr()))?;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("WebSocket endpoint: {}", config.server.ws_url());

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    bridge.shutdown();
    drop(demo);
    info!("Server shutdown complete");
    Ok(())
}

async fn run_client_command(client: &Client, command: Command) -> Result<()> {
    match command {
        Command::Get { name, attribute } => {
            let value = client.get_proxy(&name).get(&attribute).await?;
            println!("{}", render(&value)?);
        }
        Command::Set {
            name,
            attribute,
            value,
        } => {
            client.get_proxy(&name).set(&attribute, parse_value(&value)).await?;
        }
        Command::Call { name, method, args } => {
            let args = args.iter().map(String::as_str).map(parse_value).collect();
            let result = client.get_proxy(&name).call(&method, args).await?;
            println!("{}", render(&result)?);
        }
        Command::Watch { name } => {
            // Fetching the context mirrors every context object in this session
            let proxy = client
                .context()
                .await?
                .remove(&name)
                .ok_or_else(|| anyhow!("no context object named '{name}'"))?;
            let mut events = proxy.subscribe();
            info!(public_name = proxy.public_name(), "Watching for changes");

            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => println!("{}.{} = {}", name, event.attribute, render(&event.value)?),
                        Err(RecvError::Lagged(skipped)) => warn!(skipped, "Dropped change notifications"),
                        Err(RecvError::Closed) => break,
                    },
                    _ = client.closed() => {
                        warn!("Server closed the connection");
                        break;
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
        Command::Serve { .. } => return Err(anyhow!("serve is not a client command")),
    }
    Ok(())
}

/// Parse a CLI value as JSON, falling back to a plain string
fn parse_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::from(text))
}

fn render(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
