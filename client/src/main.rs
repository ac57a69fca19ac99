use clap::Parser;
use client::{ClientConfig, ClientDriver};
use log::{error, info};
use shared::game::GameParams;
use shared::net::UdpServer;
use shared::session::GameLoop;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to log in to
    #[arg(short = 's', long, default_value = "127.0.0.1:8088")]
    server: SocketAddr,

    /// Local IPv4 address to bind and advertise
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: Ipv4Addr,

    /// Local port to bind and advertise
    #[arg(short, long, default_value = "40000")]
    port: u16,

    /// Milliseconds between game ticks
    #[arg(short, long, default_value = "30")]
    tick_ms: u64,

    /// Grid width in cells
    #[arg(long, default_value = "64")]
    width: u32,

    /// Grid height in cells (no short flag to avoid conflict with --help)
    #[arg(long, default_value = "64")]
    height: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut socket = UdpServer::new(args.host.to_string(), args.port);
    socket.initialize()?;

    let client_addr = match socket.local_addr()? {
        SocketAddr::V4(addr) => addr,
        SocketAddr::V6(_) => SocketAddrV4::new(args.host, args.port),
    };
    let config = ClientConfig {
        client_addr,
        server_addr: args.server,
    };

    info!("Starting client on {}", client_addr);
    info!("Logging in to {}", args.server);

    let shutdown = socket.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down");
                shutdown.shutdown();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    let params = GameParams {
        width: args.width,
        height: args.height,
        ..GameParams::default()
    };
    let mut game_loop = GameLoop::new(params, ClientDriver::new(config), socket.transport()?);
    socket
        .run(Duration::from_millis(args.tick_ms), &mut game_loop)
        .await?;

    match game_loop.driver().player_id() {
        Some(id) => info!("Client stopped as player {}", id),
        None => info!("Client stopped before logging in"),
    }
    Ok(())
}
