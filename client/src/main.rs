use clap::Parser;
use client::network::{Client, ClientConfig};
use log::info;
use shared::input::InputMode;
use shared::{EnvironmentConfig, JoinRequest};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:5556")]
    server: String,

    /// Input script: idle, random or constant:vx,vy,vz[,rx,ry,rz]
    #[arg(short = 'i', long, default_value = "random")]
    input: InputMode,

    /// Seed for the random input script
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many frames
    #[arg(short = 'n', long)]
    steps: Option<u64>,

    /// Relationships to subscribe to, comma separated ("ALL" for every one)
    #[arg(short = 'r', long, value_delimiter = ',')]
    relationships: Vec<String>,

    /// Skip observed objects and relations in frames
    #[arg(long)]
    no_obj_data: bool,

    /// Ask for sceneInfo in the first frame
    #[arg(long)]
    scene_info: bool,

    /// Send CREATE_ENVIRONMENT with this scene before joining
    #[arg(long)]
    scene: Option<String>,

    /// Directory to save received images to
    #[arg(long)]
    save_images: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);

    let config = ClientConfig {
        server_addr: args.server,
        join: JoinRequest {
            get_obj_data: Some(!args.no_obj_data),
            relationships: args.relationships,
            send_scene_info: args.scene_info,
            ..JoinRequest::default()
        },
        environment: args.scene.map(|scene| EnvironmentConfig {
            environment_scene: Some(scene),
            ..EnvironmentConfig::default()
        }),
        input: args.input,
        seed: args.seed,
        max_steps: args.steps,
        image_dir: args.save_images,
        ..ClientConfig::default()
    };

    let mut client = Client::new(config).await?;
    let stats = client.run().await?;

    if let (Some(first), Some(last)) = (stats.first_position, stats.last_position) {
        info!(
            "Moved from ({:.2}, {:.2}, {:.2}) to ({:.2}, {:.2}, {:.2})",
            first.x, first.y, first.z, last.x, last.y, last.z
        );
    }

    Ok(())
}
