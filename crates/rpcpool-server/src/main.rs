//! rpcpool server - HTTP and TCP front-ends for a set of worker pools.
//!
//! Loads a method registry into one pool per actor, then serves JSON
//! requests on `POST /rpc` and on a line-delimited TCP socket.

mod handler;
mod server;

use anyhow::Result;
use clap::Parser;
use rpcpool_core::{
    registry, ActorRegistry, PoolOptions, RpcDispatch, RuntimeConfig, TcpOptions, TcpServer,
    TransportConfig,
};
use server::HttpOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "rpcpool-server")]
#[command(about = "HTTP and TCP front-ends for rpcpool worker pools")]
struct Args {
    /// Host to bind both listeners to
    #[arg(long, env = "RPC_HOST", default_value = TransportConfig::DEFAULT_HOST)]
    host: String,

    /// HTTP port (0 = auto-assign)
    #[arg(long, env = "RPC_HTTP_PORT", default_value_t = TransportConfig::DEFAULT_HTTP_PORT)]
    http_port: u16,

    /// TCP port (0 = auto-assign)
    #[arg(long, env = "RPC_TCP_PORT", default_value_t = TransportConfig::DEFAULT_TCP_PORT)]
    tcp_port: u16,

    /// Workers per actor pool
    #[arg(long, env = "RPC_POOL_SIZE", default_value_t = RuntimeConfig::DEFAULT_POOL_SIZE)]
    pool_size: usize,

    /// Largest accepted HTTP body, in bytes
    #[arg(long, env = "RPC_BODY_LIMIT", default_value_t = TransportConfig::DEFAULT_BODY_LIMIT)]
    body_limit: usize,

    /// HTTP request timeout in milliseconds
    #[arg(
        long,
        env = "RPC_TIMEOUT",
        default_value_t = TransportConfig::DEFAULT_HTTP_TIMEOUT.as_millis() as u64
    )]
    timeout: u64,

    /// Per-call deadline in milliseconds (0 = none)
    #[arg(long, env = "RPC_CALL_TIMEOUT", default_value_t = 0)]
    call_timeout: u64,

    /// Longest accepted TCP line, in bytes
    #[arg(long, env = "RPC_MAX_LINE_BYTES", default_value_t = TransportConfig::DEFAULT_MAX_LINE_BYTES)]
    max_line_bytes: usize,

    /// Comma-separated actor names, one pool each
    #[arg(
        long,
        env = "RPC_ACTORS",
        value_delimiter = ',',
        default_value = RuntimeConfig::DEFAULT_ACTOR_NAME
    )]
    actors: Vec<String>,

    /// Method registry to load into every worker
    #[arg(long, env = "RPC_REGISTRY", default_value = RuntimeConfig::DEFAULT_REGISTRY)]
    registry: String,

    /// Enable debug logging
    #[arg(short, long, env = "RPC_DEBUG")]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; stdout is reserved for the port lines
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    info!("Starting rpcpool server");

    let loader = registry::resolve(&args.registry)?;
    let mut options = PoolOptions::with_size(args.pool_size);
    if args.call_timeout > 0 {
        options = options.call_timeout(Duration::from_millis(args.call_timeout));
    }

    let actors = Arc::new(
        ActorRegistry::initialize(loader, args.pool_size, &args.actors, options).await?,
    );
    info!(
        "Registry '{}' loaded into actors: {}",
        args.registry,
        actors.names().join(", ")
    );

    let dispatch: Arc<dyn RpcDispatch> = actors.clone();
    let mut http = server::start_server(
        dispatch,
        &args.host,
        args.http_port,
        HttpOptions {
            body_limit: args.body_limit,
            timeout: Duration::from_millis(args.timeout),
        },
    )
    .await?;

    let tcp_addr: SocketAddr = format!("{}:{}", args.host, args.tcp_port).parse()?;
    let mut tcp = TcpServer::bind(
        tcp_addr,
        actors.clone(),
        TcpOptions {
            max_line_bytes: args.max_line_bytes,
            ..TcpOptions::default()
        },
    )
    .await?;

    // Print ports for the parent process to read (intentional stdout for IPC)
    println!("HTTP_PORT={}", http.addr().port());
    println!("TCP_PORT={}", tcp.addr().port());

    info!("HTTP on {}, TCP on {}", http.addr(), tcp.addr());

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, closing actors");

    http.shutdown();
    tcp.shutdown();
    actors.close_all().await;
    http.stopped().await;

    Ok(())
}
