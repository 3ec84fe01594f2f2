use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::{error, info};
use server::config::{GameConfig, WorldBounds};
use server::hub::Hub;
use server::network::NetworkServer;
use server::stats::StatsCollector;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Tick rate (updates per second)
    #[clap(short, long, default_value = "30")]
    tick_rate: u32,
    /// Player speed in world units per second
    #[clap(long, default_value = "5.0")]
    move_speed: f64,
    #[clap(long, default_value = "-50.0", allow_hyphen_values = true)]
    min_x: f64,
    #[clap(long, default_value = "50.0", allow_hyphen_values = true)]
    max_x: f64,
    #[clap(long, default_value = "-50.0", allow_hyphen_values = true)]
    min_y: f64,
    #[clap(long, default_value = "50.0", allow_hyphen_values = true)]
    max_y: f64,
    /// Sessions beyond this join as spectators
    #[clap(long, default_value = "100")]
    max_players: usize,
    /// Projectile lifetime in milliseconds, 0 keeps them forever
    #[clap(long, default_value = "5000")]
    projectile_lifetime_ms: u64,
    /// Evict sessions that send nothing for this long, 0 disables
    #[clap(long, default_value = "90")]
    idle_timeout_secs: u64,
}

impl Args {
    fn game_config(&self) -> anyhow::Result<GameConfig> {
        let mut config = GameConfig::with_tick_rate(self.tick_rate)?;
        config.move_speed = self.move_speed;
        config.world_bounds = WorldBounds {
            min_x: self.min_x,
            max_x: self.max_x,
            min_y: self.min_y,
            max_y: self.max_y,
        };
        config.max_players = self.max_players;
        config.projectile_lifetime =
            (self.projectile_lifetime_ms > 0).then(|| Duration::from_millis(self.projectile_lifetime_ms));
        config.idle_timeout =
            (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs));
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.game_config().context("invalid server configuration")?;

    let (hub, handle) = Hub::new(config.clone())?;
    let (stats, stats_rx) = StatsCollector::new(handle.counters(), config.stats_interval);

    let address = format!("{}:{}", args.host, args.port);
    let server = NetworkServer::bind(&address, handle.clone(), &config)
        .await
        .with_context(|| format!("failed to bind {}", address))?;

    info!(
        "Starting arena server on {} at {} Hz, {} players max",
        address, config.tick_rate, config.max_players
    );

    let mut hub_task = tokio::spawn(hub.run());
    let stats_task = tokio::spawn(stats.run());
    let server_task = tokio::spawn(server.run());

    tokio::select! {
        result = &mut hub_task => {
            if let Err(e) = result {
                error!("Hub task panicked: {}", e);
            }
        }
        result = server_task => {
            if let Err(e) = result {
                error!("Network task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            if handle.shutdown().is_ok() {
                let _ = tokio::time::timeout(Duration::from_secs(1), &mut hub_task).await;
            }
        }
    }

    stats_task.abort();
    info!("Final stats: {:?}", *stats_rx.borrow());
    Ok(())
}
