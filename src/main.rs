//! netbridge demo
//!
//! Drives a [`Bridge`] from the main thread the way a host would: create
//! sessions, register callbacks, then drain the task queue on a fixed tick.
//!
//! ```text
//! netbridge serve --port 9001          # echo server
//! netbridge get https://example.com/   # one HTTP GET
//! netbridge connect ws://127.0.0.1:9001/ --send hello
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use netbridge::config::{load_config, BridgeConfig};
use netbridge::observability::{logging, metrics};
use netbridge::{Bridge, HttpCall, MessageMode, Param, WsEvent};

#[derive(Parser)]
#[command(name = "netbridge")]
#[command(about = "Event bridge demo for WebSocket and HTTP sessions", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a WebSocket echo server until Ctrl-C
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(short, long, default_value_t = 9001)]
        port: u16,
    },
    /// Perform one HTTP GET and print the response
    Get { url: String },
    /// Connect a WebSocket client and print what arrives
    Connect {
        url: String,
        /// Text to send once the connection opens
        #[arg(long)]
        send: Option<String>,
        /// Deliver messages as parsed JSON documents
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => BridgeConfig::default(),
    };
    logging::init_logging(&config.observability);

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let tick = Duration::from_millis(config.drain.tick_ms);
    let bridge = Bridge::new(config)?;
    let done = Arc::new(AtomicBool::new(false));

    match cli.command {
        Commands::Serve { host, port } => serve(&bridge, &host, port, &done)?,
        Commands::Get { url } => get(&bridge, &url, &done)?,
        Commands::Connect { url, send, json } => connect(&bridge, &url, send, json, &done)?,
    }

    while !done.load(Ordering::SeqCst) {
        bridge.drain();
        std::thread::sleep(tick);
    }
    bridge.drain();

    let abandoned = bridge.shutdown();
    tracing::info!(abandoned, "Shutdown complete");
    Ok(())
}

fn serve(
    bridge: &Bridge,
    host: &str,
    port: u16,
    done: &Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = bridge.ws_server_create(host, port);

    bridge.ws_server_on(
        server,
        WsEvent::Open,
        Arc::new(|_: &Bridge, params: &[Param]| {
            tracing::info!(remote = ?params[1].as_str(), id = ?params[2].as_str(), "Client connected");
        }),
    )?;
    bridge.ws_server_on(
        server,
        WsEvent::Message,
        Arc::new(|bridge: &Bridge, params: &[Param]| {
            let (Some(client), Some(text)) = (params[1].as_handle(), params[2].as_str()) else {
                return;
            };
            if let Ok(client) = bridge.ws_client(client) {
                client.send(text);
            }
        }),
    )?;
    bridge.ws_server_on(
        server,
        WsEvent::Close,
        Arc::new(|_: &Bridge, params: &[Param]| {
            tracing::info!(code = ?params[1].as_cell(), id = ?params[4].as_str(), "Client disconnected");
        }),
    )?;

    let addr = bridge.ws_server_start(server)?;
    println!("echo server listening on ws://{addr}/");

    let stop = Arc::clone(done);
    bridge.runtime().spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        stop.store(true, Ordering::SeqCst);
    });
    Ok(())
}

fn get(bridge: &Bridge, url: &str, done: &Arc<AtomicBool>) -> Result<(), Box<dyn std::error::Error>> {
    let request = bridge.http_create(url)?;
    let finished = Arc::clone(done);
    bridge.http_on_response(
        request,
        Arc::new(move |bridge: &Bridge, params: &[Param]| {
            let status = params[2].as_cell().unwrap_or_default();
            if status == 0 {
                let error = params[0]
                    .as_handle()
                    .and_then(|h| bridge.http(h).ok())
                    .and_then(|session| session.response_error());
                eprintln!("request failed: {}", error.unwrap_or_default());
            } else {
                println!("HTTP {status}");
                println!("{}", params[1].as_str().unwrap_or_default());
            }
            finished.store(true, Ordering::SeqCst);
        }),
    )?;
    bridge.http_perform(request, HttpCall::Get, 0)?;
    Ok(())
}

fn connect(
    bridge: &Bridge,
    url: &str,
    send: Option<String>,
    json: bool,
    done: &Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mode = if json { MessageMode::Json } else { MessageMode::Text };
    let client = bridge.ws_client_create(url, mode)?;

    bridge.ws_client_on(
        client,
        WsEvent::Open,
        Arc::new(move |bridge: &Bridge, params: &[Param]| {
            println!("connected");
            if let (Some(text), Some(Ok(client))) =
                (&send, params[0].as_handle().map(|h| bridge.ws_client(h)))
            {
                client.send(text.as_str());
            }
        }),
    )?;
    bridge.ws_client_on(
        client,
        WsEvent::Message,
        Arc::new(|bridge: &Bridge, params: &[Param]| match &params[1] {
            Param::Str(text) => println!("< {text}"),
            Param::Handle(doc) => match bridge.json_serialize(*doc) {
                Ok(text) => println!("< {text}"),
                Err(e) => eprintln!("unreadable document: {e}"),
            },
            Param::Cell(_) => {}
        }),
    )?;

    let closed = Arc::clone(done);
    bridge.ws_client_on(
        client,
        WsEvent::Close,
        Arc::new(move |_: &Bridge, params: &[Param]| {
            println!(
                "closed: {} {}",
                params[1].as_cell().unwrap_or_default(),
                params[2].as_str().unwrap_or_default()
            );
            closed.store(true, Ordering::SeqCst);
        }),
    )?;
    let failed = Arc::clone(done);
    bridge.ws_client_on(
        client,
        WsEvent::Error,
        Arc::new(move |_: &Bridge, params: &[Param]| {
            eprintln!("error: {}", params[1].as_str().unwrap_or_default());
            failed.store(true, Ordering::SeqCst);
        }),
    )?;

    bridge.ws_client_connect(client)?;
    Ok(())
}
