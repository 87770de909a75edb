use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use server::spawn::RoomBounds;
use shared::input::InputMode;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "5556")]
    port: u16,

    /// Tick rate (ticks per second)
    #[arg(short, long, default_value = "50")]
    tick_rate: u32,

    /// Maximum number of concurrent connections
    #[arg(short, long, default_value = "16")]
    max_connections: usize,

    /// Physics time per simulation step, in seconds
    #[arg(long, default_value = "0.02")]
    physics_step: f32,

    /// Radius of the observation query around each avatar
    #[arg(long, default_value = "10.0")]
    observed_range: f32,

    #[arg(long, default_value = "1.0")]
    move_speed: f32,

    #[arg(long, default_value = "1.0")]
    rot_speed: f32,

    /// Scene loaded at startup
    #[arg(short, long, default_value = "Empty")]
    scene: String,

    /// Default render variants, comma separated; "default" for the plain render
    #[arg(long, default_value = "default", value_delimiter = ',')]
    shaders: Vec<String>,

    #[arg(long, default_value = "64")]
    image_width: u32,

    #[arg(long, default_value = "48")]
    image_height: u32,

    /// Room size used for spawn placement, width x depth
    #[arg(long, default_value = "10.0")]
    room_width: f32,

    #[arg(long, default_value = "10.0")]
    room_depth: f32,

    #[arg(long, default_value = "1000")]
    spawn_attempts: u32,

    /// Seed for spawn placement and test client input
    #[arg(long)]
    seed: Option<u64>,

    /// Wait for the first client's CREATE_ENVIRONMENT before ticking
    #[arg(long)]
    await_environment: bool,

    /// Start an in-process loopback client
    #[arg(long)]
    test_client: bool,

    /// Loopback client input: idle, random or constant:vx,vy,vz[,rx,ry,rz]
    #[arg(long, default_value = "random")]
    test_input: InputMode,

    /// Loopback client requests sceneInfo in its first frame
    #[arg(long)]
    send_scene_info: bool,

    /// Answer CLIENT_JOIN with CLIENT_INIT
    #[arg(long)]
    confirm_join: bool,

    /// Log every message sent and received
    #[arg(long)]
    debug_messages: bool,

    /// Log the duration of every simulation step
    #[arg(long)]
    log_timing: bool,

    /// Directory for images received by the loopback client
    #[arg(long)]
    save_images: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let defaults = ServerConfig::default();
        let default_shaders = self
            .shaders
            .into_iter()
            .map(|s| if s == "default" { None } else { Some(s) })
            .collect();

        ServerConfig {
            bind_address: format!("{}:{}", self.host, self.port),
            tick_duration: Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64),
            max_connections: self.max_connections,
            physics_step: self.physics_step,
            observed_range: self.observed_range,
            move_speed: self.move_speed,
            rot_speed: self.rot_speed,
            environment_scene: self.scene,
            default_shaders,
            image_width: self.image_width,
            image_height: self.image_height,
            room: RoomBounds {
                width: self.room_width,
                depth: self.room_depth,
            },
            spawn_attempts: self.spawn_attempts,
            spawn_seed: self.seed,
            await_environment: self.await_environment,
            create_test_client: self.test_client,
            test_client_input: self.test_input,
            send_scene_info: self.send_scene_info,
            confirm_join: self.confirm_join,
            debug_network_messages: self.debug_messages,
            log_timing: self.log_timing,
            save_debug_images: self.save_images.is_some(),
            debug_image_dir: self.save_images.unwrap_or(defaults.debug_image_dir),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = Args::parse().into_config();

    info!("Starting server...");
    info!(
        "Scene: {}, tick: {:?}, max connections: {}",
        config.environment_scene, config.tick_duration, config.max_connections
    );
    if config.await_environment {
        info!("Waiting for the first client to send CREATE_ENVIRONMENT");
    }

    let mut server = Server::new(config).await?;
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            shutdown.shutdown();
        }
    });

    server.run().await?;

    Ok(())
}
