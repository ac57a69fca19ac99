use clap::Parser;
use log::{error, info};
use server::ServerDriver;
use shared::game::GameParams;
use shared::net::UdpServer;
use shared::session::GameLoop;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8088")]
    port: u16,

    /// Milliseconds between game ticks
    #[arg(short, long, default_value = "30")]
    tick_ms: u64,

    /// Grid width in cells
    #[arg(long, default_value = "64")]
    width: u32,

    /// Grid height in cells
    #[arg(long, default_value = "64")]
    height: u32,

    /// Maximum number of concurrent sessions
    #[arg(short, long, default_value = "8")]
    max_players: u32,

    /// Milliseconds of silence before a session is reported as stale
    #[arg(long, default_value = "10000")]
    player_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    shared::selftest::run_all()?;

    let params = GameParams {
        height: args.height,
        width: args.width,
        max_players: args.max_players,
        player_timeout: Duration::from_millis(args.player_timeout_ms),
    };

    let mut server = UdpServer::new(args.host, args.port);
    server.initialize()?;

    info!(
        "Server running on {} ({}x{} grid, up to {} players)",
        server.local_addr()?,
        params.width,
        params.height,
        params.max_players
    );

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down");
                shutdown.shutdown();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    let mut game_loop = GameLoop::new(params, ServerDriver::new(), server.transport()?);
    server
        .run(Duration::from_millis(args.tick_ms), &mut game_loop)
        .await?;

    info!(
        "Server stopped after {} ticks with {} players",
        game_loop.game().ticks(),
        game_loop.game().player_count()
    );
    Ok(())
}
