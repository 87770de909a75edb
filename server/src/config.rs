//! Server configuration and defaults

use crate::spawn::RoomBounds;
use shared::input::InputMode;
use shared::{EnvironmentConfig, DEFAULT_SCENE};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the simulation server.
///
/// Network settings and debugging switches are fixed at startup; the scene,
/// observation range and speeds can be changed at runtime by
/// `CREATE_ENVIRONMENT` or `CLIENT_SCENE_SWITCH`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the TCP listener binds to
    pub bind_address: String,
    /// Interval between simulation ticks
    pub tick_duration: Duration,
    /// Maximum number of concurrent connections, loopback ones included
    pub max_connections: usize,

    /// Physics time advanced per barrier step, in seconds
    pub physics_step: f32,
    /// Radius of the range query around each avatar
    pub observed_range: f32,
    /// Scale applied to the decoded input velocity
    pub move_speed: f32,
    /// Scale and limit for the decoded input rotation
    pub rot_speed: f32,
    pub environment_scene: String,

    /// Render variants for clients that do not choose any
    pub default_shaders: Vec<Option<String>>,
    pub image_width: u32,
    pub image_height: u32,

    pub room: RoomBounds,
    pub spawn_attempts: u32,
    pub spawn_seed: Option<u64>,

    /// Block before the tick loop until the first client sends `CREATE_ENVIRONMENT`
    pub await_environment: bool,
    /// Start an in-process loopback client
    pub create_test_client: bool,
    /// How the loopback client picks its input
    pub test_client_input: InputMode,
    /// Loopback client asks for `sceneInfo` in its first frame
    pub send_scene_info: bool,
    /// Answer `CLIENT_JOIN` with `CLIENT_INIT`
    pub confirm_join: bool,
    pub debug_network_messages: bool,
    pub log_timing: bool,
    /// Save images received by the test client
    pub save_debug_images: bool,
    pub debug_image_dir: PathBuf,
}

impl ServerConfig {
    /// Applies the runtime-adjustable fields present in `env`.
    pub fn apply_environment(&mut self, env: &EnvironmentConfig) {
        if let Some(scene) = &env.environment_scene {
            self.environment_scene = scene.clone();
        }
        if let Some(range) = env.observed_range {
            self.observed_range = range;
        }
        if let Some(speed) = env.move_speed {
            self.move_speed = speed;
        }
        if let Some(speed) = env.rot_speed {
            self.rot_speed = speed;
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5556".to_string(),
            tick_duration: Duration::from_millis(20),
            max_connections: 16,
            physics_step: 0.02,
            observed_range: 10.0,
            move_speed: 1.0,
            rot_speed: 1.0,
            environment_scene: DEFAULT_SCENE.to_string(),
            default_shaders: vec![None],
            image_width: 64,
            image_height: 48,
            room: RoomBounds::default(),
            spawn_attempts: 1000,
            spawn_seed: None,
            await_environment: false,
            create_test_client: false,
            test_client_input: InputMode::Random,
            send_scene_info: false,
            confirm_join: false,
            debug_network_messages: false,
            log_timing: false,
            save_debug_images: false,
            debug_image_dir: PathBuf::from("debug_images"),
        }
    }
}
