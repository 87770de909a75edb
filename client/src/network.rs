use log::{debug, info, warn};
use shared::images::DebugImageExporter;
use shared::input::{InputMode, InputScript};
use shared::wire::{self, ReadOutcome};
use shared::{EnvironmentConfig, FrameUpdate, JoinRequest, Message, MessageType, Vec3};
use std::path::PathBuf;
use tokio::net::TcpStream;

/// Settings for a headless client run
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    pub join: JoinRequest,
    /// Sent before the join when present
    pub environment: Option<EnvironmentConfig>,
    pub input: InputMode,
    pub seed: Option<u64>,
    /// Stop after this many frames
    pub max_steps: Option<u64>,
    /// Save received images here
    pub image_dir: Option<PathBuf>,
    /// Extension for saved images
    pub image_extension: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:5556".to_string(),
            join: JoinRequest::default(),
            environment: None,
            input: InputMode::Random,
            seed: None,
            max_steps: None,
            image_dir: None,
            image_extension: "bmp".to_string(),
        }
    }
}

/// What a client saw during its run
#[derive(Debug, Clone, Default)]
pub struct ClientStats {
    pub frames_received: u64,
    pub inputs_sent: u64,
    pub images_received: u64,
    pub join_confirmed: bool,
    pub first_position: Option<Vec3>,
    pub last_position: Option<Vec3>,
    pub last_frame: Option<FrameUpdate>,
}

pub struct Client {
    stream: TcpStream,
    config: ClientConfig,
    script: InputScript,
    exporter: Option<DebugImageExporter>,
    stats: ClientStats,
}

impl Client {
    pub async fn new(config: ClientConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let stream = TcpStream::connect(&config.server_addr).await?;
        stream.set_nodelay(true)?;
        info!("Connected to {}", config.server_addr);

        let exporter = match &config.image_dir {
            Some(dir) => Some(DebugImageExporter::new(dir, &config.image_extension)?),
            None => None,
        };

        Ok(Client {
            stream,
            script: InputScript::new(config.input, config.seed),
            config,
            exporter,
            stats: ClientStats::default(),
        })
    }

    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    async fn send(&mut self, message: &Message) -> Result<(), Box<dyn std::error::Error>> {
        wire::write_message(&mut self.stream, message).await?;
        Ok(())
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(env) = self.config.environment.clone() {
            info!("Sending environment");
            self.send(&env.to_message()?).await?;
        }
        info!("Joining...");
        let join = self.config.join.to_message()?;
        self.send(&join).await
    }

    /// Handles one message; returns true when the run should stop.
    async fn handle_message(&mut self, message: Message) -> Result<bool, Box<dyn std::error::Error>> {
        let envelope = message.decode()?;
        match envelope.msg_type {
            MessageType::FrameUpdate => {
                let update: FrameUpdate = envelope.parse()?;
                self.stats.frames_received += 1;
                self.stats.images_received += message.binary_frames().len() as u64;
                if self.stats.first_position.is_none() {
                    self.stats.first_position = Some(update.avatar_position);
                }
                self.stats.last_position = Some(update.avatar_position);
                debug!(
                    "Frame {}: position ({:.3}, {:.3}, {:.3}), {} objects in view",
                    self.stats.frames_received,
                    update.avatar_position.x,
                    update.avatar_position.y,
                    update.avatar_position.z,
                    update.observed_objects.as_ref().map_or(0, |o| o.len())
                );

                if let Some(exporter) = self.exporter.as_mut() {
                    if let Err(e) = exporter.save(message.binary_frames()) {
                        warn!("Cannot save images: {}", e);
                    }
                }
                self.stats.last_frame = Some(update);

                let done = self
                    .config
                    .max_steps
                    .map_or(false, |max| self.stats.frames_received >= max);
                if done {
                    return Ok(true);
                }

                let input = self.script.next_input().to_message()?;
                self.send(&input).await?;
                self.stats.inputs_sent += 1;
            }
            MessageType::ClientInit => {
                info!("Join confirmed");
                self.stats.join_confirmed = true;
            }
            other => warn!("Unexpected message type {}", other),
        }
        Ok(false)
    }

    /// Joins, then answers frames until the step limit or the server closes.
    pub async fn run(&mut self) -> Result<ClientStats, Box<dyn std::error::Error>> {
        self.connect().await?;

        loop {
            match wire::read_message(&mut self.stream).await? {
                ReadOutcome::Message(message) => match self.handle_message(message).await {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(e) => warn!("Dropping message: {}", e),
                },
                ReadOutcome::Undecodable(e) => warn!("Dropping undecodable message: {}", e),
                ReadOutcome::Eof => {
                    info!("Server closed the connection");
                    break;
                }
            }
        }

        info!(
            "Run finished: {} frames, {} inputs, {} images",
            self.stats.frames_received, self.stats.inputs_sent, self.stats.images_received
        );
        Ok(self.stats.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::InputCommand;
    use tokio::net::TcpListener;

    async fn read(stream: &mut TcpStream) -> Message {
        match wire::read_message(stream).await.unwrap() {
            ReadOutcome::Message(m) => m,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_joins_and_answers_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig {
            server_addr: listener.local_addr().unwrap().to_string(),
            environment: Some(EnvironmentConfig {
                environment_scene: Some("Playroom".to_string()),
                ..EnvironmentConfig::default()
            }),
            input: InputMode::Idle,
            max_steps: Some(2),
            ..ClientConfig::default()
        };

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            assert_eq!(read(&mut stream).await.peek_type(), Some(MessageType::CreateEnvironment));
            assert_eq!(read(&mut stream).await.peek_type(), Some(MessageType::ClientJoin));

            let frame = FrameUpdate {
                avatar_position: Vec3::new(1.0, 0.5, 2.0),
                ..FrameUpdate::default()
            };
            wire::write_message(&mut stream, &Message::bare(&MessageType::ClientInit))
                .await
                .unwrap();
            wire::write_message(&mut stream, &frame.to_message(vec![vec![0; 4]]).unwrap())
                .await
                .unwrap();

            let input: InputCommand = read(&mut stream).await.decode().unwrap().parse().unwrap();
            assert_eq!(input.vel, vec![0, 0, 0]);

            wire::write_message(&mut stream, &frame.to_message(Vec::new()).unwrap())
                .await
                .unwrap();
        });

        let mut client = Client::new(config).await.unwrap();
        let stats = client.run().await.unwrap();
        server.await.unwrap();

        assert!(stats.join_confirmed);
        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.inputs_sent, 1);
        assert_eq!(stats.images_received, 1);
        assert_eq!(stats.first_position, Some(Vec3::new(1.0, 0.5, 2.0)));
    }

    #[tokio::test]
    async fn test_client_stops_on_server_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig {
            server_addr: listener.local_addr().unwrap().to_string(),
            ..ClientConfig::default()
        };

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read(&mut stream).await;
        });

        let mut client = Client::new(config).await.unwrap();
        let stats = client.run().await.unwrap();
        server.await.unwrap();

        assert_eq!(stats.frames_received, 0);
    }
}
