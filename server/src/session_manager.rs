//! Session manager: message dispatch, lock-step barrier and frame assembly
//!
//! Owns every piece of simulation state and mutates it from one place:
//! - [`SessionManager::tick`] polls each connection once, lets loopback
//!   clients answer, renders a frame and drains queued captures
//! - inbound messages are routed by type tag; `CLIENT_INPUT` marks its
//!   avatar ready and re-evaluates the barrier
//! - when every avatar is ready the world steps once, observation and
//!   subscribed relationships are computed, and each avatar's next capture
//!   is queued
//! - the capture pipeline reports completions back through
//!   [`FrameAssembler`], which builds and sends the `FRAME_UPDATE`

use crate::avatar::{AvatarId, AvatarSession, AVATAR_RADIUS};
use crate::capture::{
    CameraPose, CaptureHost, CaptureRequest, FrameCapturePipeline, PlaceholderRenderer, Renderer,
};
use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionId, LoopbackEndpoint, Poll};
use crate::physics::BodyDesc;
use crate::relations::{self, RelationValue, RelationshipRegistry};
use crate::scene::{SceneCatalog, SceneLoader};
use crate::semantic::ObservedSet;
use crate::session_registry::{ConnectionState, SessionRegistry};
use crate::spawn::find_spawn_point;
use crate::test_client::LoopbackClient;
use crate::world::World;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Map;
use shared::images::DebugImageExporter;
use shared::input::{InputMode, InputScript};
use shared::{
    EnvironmentConfig, FrameUpdate, InputCommand, JoinRequest, Message, MessageType,
    ProtocolError, SceneSwitch, Vec3,
};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpStream;

/// Why an inbound message was dropped. None of these stop the server.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("cannot decode message: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("unexpected message type {0}")]
    UnknownType(String),

    #[error("{msg_type} on connection {connection} before join")]
    Orphan {
        connection: ConnectionId,
        msg_type: MessageType,
    },

    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),
}

/// Relationship results of one step, shared by every avatar's frame
struct PublishedRelations {
    step: u64,
    values: BTreeMap<String, RelationValue>,
    /// Avatars whose frame for this step has not been assembled yet
    awaiting: BTreeSet<AvatarId>,
}

pub struct SessionManager {
    config: ServerConfig,
    registry: SessionRegistry,
    world: World,
    scenes: Box<dyn SceneLoader>,
    relationships: RelationshipRegistry,
    pipeline: FrameCapturePipeline,
    renderer: Box<dyn Renderer>,
    published: Option<PublishedRelations>,
    rng: StdRng,
    step: u64,
}

impl SessionManager {
    /// Manager with the built-in physics, scenes, relationships and renderer
    pub fn new(config: ServerConfig) -> Self {
        let renderer = PlaceholderRenderer::new(config.image_width, config.image_height);
        Self::with_collaborators(
            config,
            World::default(),
            Box::new(SceneCatalog::new()),
            Box::new(renderer),
            RelationshipRegistry::with_builtins(),
        )
    }

    /// Loads the configured environment scene into `world` before returning.
    pub fn with_collaborators(
        config: ServerConfig,
        world: World,
        scenes: Box<dyn SceneLoader>,
        renderer: Box<dyn Renderer>,
        relationships: RelationshipRegistry,
    ) -> Self {
        let rng = match config.spawn_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let scene = config.environment_scene.clone();

        let mut manager = Self {
            registry: SessionRegistry::new(config.max_connections),
            config,
            world,
            scenes,
            relationships,
            pipeline: FrameCapturePipeline::new(),
            renderer,
            published: None,
            rng,
            step: 0,
        };
        manager.load_environment(&scene);
        manager
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn pipeline(&self) -> &FrameCapturePipeline {
        &self.pipeline
    }

    pub fn relationships_mut(&mut self) -> &mut RelationshipRegistry {
        &mut self.relationships
    }

    /// Number of completed barrier steps
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Registers an accepted TCP stream. Returns None if the server is full.
    pub fn accept(&mut self, stream: TcpStream) -> Option<ConnectionId> {
        let id = self
            .registry
            .add_connection(|id| Connection::spawn(id, stream));
        if id.is_none() {
            warn!(
                "Rejecting connection: {} connections already open",
                self.registry.len()
            );
        }
        id
    }

    /// Opens an in-memory connection; the caller drives the client end.
    pub fn open_loopback(&mut self) -> Option<(ConnectionId, LoopbackEndpoint)> {
        let mut endpoint = None;
        let connection = self.registry.add_connection(|id| {
            let (connection, client_end) = Connection::loopback(id);
            endpoint = Some(client_end);
            connection
        })?;
        endpoint.map(|endpoint| (connection, endpoint))
    }

    /// Opens a loopback connection with an in-process client that joins
    /// immediately and answers every frame with input from `mode`.
    pub fn create_test_client(&mut self, join: &JoinRequest, mode: InputMode) -> Option<ConnectionId> {
        let (connection, endpoint) = match self.open_loopback() {
            Some(opened) => opened,
            None => {
                warn!("Cannot create test client: server is full");
                return None;
            }
        };

        let exporter = if self.config.save_debug_images {
            match DebugImageExporter::new(
                &self.config.debug_image_dir,
                self.renderer.file_extension(),
            ) {
                Ok(exporter) => Some(exporter),
                Err(e) => {
                    warn!("Debug images disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let script = InputScript::new(mode, self.config.spawn_seed);
        match LoopbackClient::new(endpoint, join, script, exporter) {
            Ok(client) => {
                self.registry.attach_test_client(connection, client);
                info!("Test client started on connection {}", connection);
                Some(connection)
            }
            Err(e) => {
                error!("Cannot start test client: {}", e);
                self.registry.remove_connection(connection);
                None
            }
        }
    }

    /// One server tick: poll, let loopback clients answer, render and send.
    pub fn tick(&mut self) {
        for connection in self.registry.connection_ids() {
            let poll = match self.registry.entry_mut(connection) {
                Some(entry) => entry.connection.poll(),
                None => continue,
            };
            match poll {
                Poll::Message(message) => self.dispatch(connection, message),
                Poll::Idle => {}
                Poll::Closed => self.disconnect(connection),
            }
        }

        for client in self.registry.test_clients_mut() {
            client.poll();
        }

        self.render_frame();
    }

    /// Renders a frame, then drains the captures queued before it.
    ///
    /// Returns the number of frames sent.
    pub fn render_frame(&mut self) -> usize {
        self.pipeline.begin_render();
        self.renderer.render_frame();
        self.pipeline.end_render();

        let mut assembler = FrameAssembler {
            registry: &mut self.registry,
            world: &self.world,
            published: self.published.as_mut(),
            debug_messages: self.config.debug_network_messages,
        };
        let sent = match self.pipeline.drain(self.renderer.as_mut(), &mut assembler) {
            Ok(sent) => sent,
            Err(e) => {
                warn!("Capture drain skipped: {}", e);
                0
            }
        };

        let done = self
            .published
            .as_ref()
            .map(|p| p.awaiting.is_empty())
            .unwrap_or(false);
        if done {
            if let Some(published) = self.published.take() {
                debug!("Relations of step {} discarded", published.step);
            }
        }
        sent
    }

    /// Handles one message, logging instead of failing.
    pub fn dispatch(&mut self, connection: ConnectionId, message: Message) {
        if let Err(e) = self.handle_message(connection, message) {
            match e {
                DispatchError::Orphan { .. } | DispatchError::ConnectionClosed(_) => {
                    debug!("Dropping message: {}", e)
                }
                _ => warn!("Dropping message on connection {}: {}", connection, e),
            }
        }
    }

    pub fn handle_message(
        &mut self,
        connection: ConnectionId,
        message: Message,
    ) -> Result<(), DispatchError> {
        if self.config.debug_network_messages {
            debug!("Connection {} -> {}", connection, message.describe());
        }
        match self.registry.state(connection) {
            None | Some(ConnectionState::Closed) => {
                return Err(DispatchError::ConnectionClosed(connection))
            }
            Some(_) => {}
        }

        let envelope = message.decode()?;
        match envelope.msg_type {
            MessageType::ClientJoin => self.on_client_join(connection, envelope.parse()?),
            MessageType::ClientInput => self.on_client_input(connection, envelope.parse()?),
            MessageType::ClientSceneSwitch => self.on_scene_switch(connection, envelope.parse()?),
            MessageType::CreateEnvironment => {
                self.on_create_environment(envelope.parse()?);
                Ok(())
            }
            other => Err(DispatchError::UnknownType(other.to_string())),
        }
    }

    /// Waits for a `CREATE_ENVIRONMENT` on `connection` and applies it.
    ///
    /// Anything else that arrives first is dispatched normally.
    pub async fn await_environment(&mut self, connection: ConnectionId) -> Result<(), DispatchError> {
        info!("Waiting for environment on connection {}", connection);
        loop {
            let message = match self.registry.entry_mut(connection) {
                Some(entry) => entry.connection.recv().await,
                None => None,
            }
            .ok_or(DispatchError::ConnectionClosed(connection))?;

            if message.peek_type() != Some(MessageType::CreateEnvironment) {
                self.dispatch(connection, message);
                continue;
            }
            match message.decode().and_then(|e| e.parse::<EnvironmentConfig>()) {
                Ok(env) => {
                    self.on_create_environment(env);
                    return Ok(());
                }
                Err(e) => warn!("Ignoring malformed environment: {}", e),
            }
        }
    }

    /// Closes the connection and releases its avatar.
    pub fn disconnect(&mut self, connection: ConnectionId) {
        let mut entry = match self.registry.remove_connection(connection) {
            Some(entry) => entry,
            None => return,
        };
        if let Some(avatar) = entry.avatar.take() {
            info!(
                "Avatar {} left with connection {} after {} frames",
                avatar.id, connection, avatar.frames_sent
            );
            self.release_avatar(avatar);
        }
        // The departed avatar may have been the last one not ready
        self.try_advance();
    }

    fn on_client_join(&mut self, connection: ConnectionId, join: JoinRequest) -> Result<(), DispatchError> {
        if let Some(previous) = self.registry.take_avatar(connection) {
            info!(
                "Connection {} joined again, replacing avatar {}",
                connection, previous.id
            );
            self.release_avatar(previous);
        }

        let id = self.registry.allocate_avatar_id();
        let position = match find_spawn_point(
            self.world.physics.as_ref(),
            &mut self.rng,
            self.config.room,
            AVATAR_RADIUS,
            self.config.spawn_attempts,
        ) {
            Ok(position) => position,
            Err(e) => {
                warn!("Avatar {}: {}, using default position", id, e);
                Vec3::new(0.0, AVATAR_RADIUS, 0.0)
            }
        };
        let body = self
            .world
            .physics
            .add_body(BodyDesc::dynamic(position, AVATAR_RADIUS));

        let mut avatar =
            AvatarSession::init_session(id, connection, body, &join, &self.config.default_shaders);
        avatar.update_observed_objects(&self.world, self.config.observed_range);
        if let Err(avatar) = self.registry.install_avatar(avatar) {
            error!("Connection {} vanished during join", connection);
            avatar.release(self.world.physics.as_mut());
            return Err(DispatchError::ConnectionClosed(connection));
        }
        self.pipeline.request_capture(id);
        info!(
            "Avatar {} joined on connection {} at ({:.2}, {:.2}, {:.2})",
            id, connection, position.x, position.y, position.z
        );

        if self.config.confirm_join {
            self.registry
                .send_to(connection, Message::bare(&MessageType::ClientInit))
                .map_err(|_| DispatchError::ConnectionClosed(connection))?;
        }
        Ok(())
    }

    fn on_client_input(&mut self, connection: ConnectionId, input: InputCommand) -> Result<(), DispatchError> {
        let avatar = self
            .registry
            .avatar_for_connection_mut(connection)
            .ok_or(DispatchError::Orphan {
                connection,
                msg_type: MessageType::ClientInput,
            })?;

        avatar.apply_options(input.get_obj_data, input.relationships.as_deref());
        avatar.apply_input(
            input.decode(),
            self.world.physics.as_mut(),
            self.config.move_speed,
            self.config.rot_speed,
        );
        avatar.ready_for_simulation = true;

        self.try_advance();
        Ok(())
    }

    fn on_scene_switch(&mut self, connection: ConnectionId, switch: SceneSwitch) -> Result<(), DispatchError> {
        if self.registry.avatar_for_connection(connection).is_none() {
            return Err(DispatchError::Orphan {
                connection,
                msg_type: MessageType::ClientSceneSwitch,
            });
        }
        self.config.apply_environment(&switch.config);
        self.config.environment_scene = switch.new_scene.clone();
        info!("Connection {} switched scene to {}", connection, switch.new_scene);
        self.load_environment(&switch.new_scene);
        Ok(())
    }

    fn on_create_environment(&mut self, env: EnvironmentConfig) {
        self.config.apply_environment(&env);
        let scene = self.config.environment_scene.clone();
        info!(
            "Environment: scene {}, range {}, move speed {}, rotation speed {}",
            scene, self.config.observed_range, self.config.move_speed, self.config.rot_speed
        );
        self.load_environment(&scene);
    }

    /// Unloads every loaded scene and loads `scene` in their place.
    fn load_environment(&mut self, scene: &str) {
        for loaded in self.scenes.loaded_scenes() {
            if let Err(e) = self.scenes.unload_scene(&loaded, &mut self.world) {
                warn!("Cannot unload scene {}: {}", loaded, e);
            }
        }
        if let Err(e) = self.scenes.load_scene(scene, &mut self.world) {
            warn!("Cannot load scene {}: {}", scene, e);
        }

        // Observations and results may name objects that no longer exist
        for avatar in self.registry.avatars_mut() {
            avatar.observed.clear();
        }
        self.published = None;
    }

    /// Advances the simulation if every avatar is ready. Returns true if it did.
    pub fn try_advance(&mut self) -> bool {
        if !self.registry.all_ready() {
            return false;
        }
        let started = Instant::now();

        self.world.physics.step(self.config.physics_step);
        self.step += 1;

        let range = self.config.observed_range;
        let mut union = ObservedSet::new();
        let mut subscribed = BTreeSet::new();
        for avatar in self.registry.avatars_mut() {
            avatar.update_observed_objects(&self.world, range);
            union.extend(avatar.observed.iter().copied());
            subscribed.extend(avatar.relationships.iter().cloned());
        }

        let values = self
            .relationships
            .evaluate_subscribed(&subscribed, &union, &self.world);
        let avatars = self.registry.avatar_ids();
        self.published = Some(PublishedRelations {
            step: self.step,
            values,
            awaiting: avatars.iter().copied().collect(),
        });

        for id in &avatars {
            self.pipeline.request_capture(*id);
        }
        for avatar in self.registry.avatars_mut() {
            avatar.ready_for_simulation = false;
        }

        if self.config.log_timing {
            info!(
                "Step {}: {} avatars, {} observed, {} relationships in {:?}",
                self.step,
                avatars.len(),
                union.len(),
                subscribed.len(),
                started.elapsed()
            );
        }
        true
    }

    fn release_avatar(&mut self, avatar: AvatarSession) {
        self.pipeline.cancel(avatar.id);
        if let Some(published) = self.published.as_mut() {
            published.awaiting.remove(&avatar.id);
        }
        debug!("Releasing avatar {}", avatar.id);
        avatar.release(self.world.physics.as_mut());
    }
}

/// Builds and sends `FRAME_UPDATE`s as captures complete
struct FrameAssembler<'a> {
    registry: &'a mut SessionRegistry,
    world: &'a World,
    published: Option<&'a mut PublishedRelations>,
    debug_messages: bool,
}

impl CaptureHost for FrameAssembler<'_> {
    fn capture_slot(&mut self, owner: AvatarId) -> Option<(&mut CaptureRequest, CameraPose)> {
        let avatar = self.registry.avatar_mut(owner)?;
        let transform = self.world.physics.transform(avatar.body)?;
        Some((
            &mut avatar.capture,
            CameraPose {
                position: transform.position,
                rotation: transform.rotation,
            },
        ))
    }

    fn capture_completed(&mut self, owner: AvatarId) {
        let semantics = &self.world.semantics;
        let avatar = match self.registry.avatar_mut(owner) {
            Some(avatar) => avatar,
            None => return,
        };

        let mut update = FrameUpdate::default();
        if let Some(transform) = self.world.physics.transform(avatar.body) {
            update.avatar_position = transform.position;
            update.avatar_rotation = transform.rotation;
        }
        if avatar.collect_world_state {
            update.observed_objects = Some(
                avatar
                    .observed
                    .iter()
                    .filter_map(|id| semantics.identifier(*id))
                    .map(str::to_string)
                    .collect(),
            );
            update.observed_relations = Some(match self.published.as_deref() {
                Some(published) => relations::results_for(
                    &published.values,
                    &avatar.relationships,
                    &avatar.observed,
                    semantics,
                ),
                None => Map::new(),
            });
        }
        if avatar.send_scene_info {
            update.scene_info = Some(semantics.scene_info());
            avatar.send_scene_info = false;
        }
        avatar.frames_sent += 1;
        let connection = avatar.connection;
        let images = avatar.capture.images().to_vec();

        if let Some(published) = self.published.as_deref_mut() {
            published.awaiting.remove(&owner);
        }

        let message = match update.to_message(images) {
            Ok(message) => message,
            Err(e) => {
                error!("Cannot encode frame for avatar {}: {}", owner, e);
                return;
            }
        };
        if self.debug_messages {
            debug!("Connection {} <- {}", connection, message.describe());
        }
        if let Err(e) = self.registry.send_to(connection, message) {
            warn!("Frame for avatar {} not sent: {}", owner, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::quantize::encode_vector;

    fn manager() -> SessionManager {
        SessionManager::new(ServerConfig {
            spawn_seed: Some(11),
            ..ServerConfig::default()
        })
    }

    fn open(manager: &mut SessionManager) -> (ConnectionId, LoopbackEndpoint) {
        manager.open_loopback().unwrap()
    }

    fn join(manager: &mut SessionManager, connection: ConnectionId) {
        let message = JoinRequest::default().to_message().unwrap();
        manager.handle_message(connection, message).unwrap();
    }

    fn input(velocity: Vec3) -> Message {
        InputCommand {
            vel: encode_vector(velocity).to_vec(),
            ang_vel: vec![0, 0, 0],
            ..InputCommand::default()
        }
        .to_message()
        .unwrap()
    }

    fn frames(endpoint: &mut LoopbackEndpoint) -> Vec<FrameUpdate> {
        let mut updates = Vec::new();
        while let Ok(message) = endpoint.from_server.try_recv() {
            let envelope = message.decode().unwrap();
            if envelope.msg_type == MessageType::FrameUpdate {
                updates.push(envelope.parse().unwrap());
            }
        }
        updates
    }

    #[test]
    fn test_join_creates_session_and_queues_capture() {
        let mut manager = manager();
        let (conn, mut endpoint) = open(&mut manager);
        join(&mut manager, conn);

        let avatar = manager.registry().avatar_for_connection(conn).unwrap();
        assert_eq!(manager.registry().state(conn), Some(ConnectionState::Active));
        assert!(manager.pipeline().is_pending(avatar.id));

        assert_eq!(manager.render_frame(), 1);
        let updates = frames(&mut endpoint);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].observed_objects, Some(Vec::new()));
        assert_eq!(updates[0].observed_relations, Some(Map::new()));
        let avatar = manager.registry().avatar_for_connection(conn).unwrap();
        assert_eq!(avatar.frames_sent, 1);
    }

    #[test]
    fn test_join_without_world_state_omits_observations() {
        let mut manager = SessionManager::new(ServerConfig {
            environment_scene: "Playroom".to_string(),
            spawn_seed: Some(11),
            ..ServerConfig::default()
        });
        let (conn, mut endpoint) = open(&mut manager);
        let join = JoinRequest {
            get_obj_data: Some(false),
            relationships: vec!["ALL".to_string()],
            ..JoinRequest::default()
        };
        manager
            .handle_message(conn, join.to_message().unwrap())
            .unwrap();
        manager.render_frame();

        manager.handle_message(conn, input(Vec3::ZERO)).unwrap();
        manager.render_frame();

        let updates = frames(&mut endpoint);
        assert_eq!(updates.len(), 2);
        for update in &updates {
            assert!(update.observed_objects.is_none());
            assert!(update.observed_relations.is_none());
        }
    }

    #[test]
    fn test_input_before_join_is_orphan() {
        let mut manager = manager();
        let (conn, _endpoint) = open(&mut manager);

        let result = manager.handle_message(conn, input(Vec3::ZERO));
        assert!(matches!(result, Err(DispatchError::Orphan { .. })));
        assert_eq!(manager.step(), 0);
    }

    #[test]
    fn test_bad_messages_are_dropped() {
        let mut manager = manager();
        let (conn, _endpoint) = open(&mut manager);
        join(&mut manager, conn);

        let garbage = Message::from_frames(vec![b"CLIENT_INPUT".to_vec(), b"{oops".to_vec()]);
        assert!(matches!(
            manager.handle_message(conn, garbage),
            Err(DispatchError::Protocol(_))
        ));
        let unknown = Message::bare(&MessageType::Unknown("CLIENT_DANCE".to_string()));
        assert!(matches!(
            manager.handle_message(conn, unknown),
            Err(DispatchError::UnknownType(_))
        ));
        assert!(matches!(
            manager.handle_message(99, Message::bare(&MessageType::ClientJoin)),
            Err(DispatchError::ConnectionClosed(99))
        ));
        assert_eq!(manager.registry().state(conn), Some(ConnectionState::Active));
    }

    #[test]
    fn test_single_avatar_advances_and_moves() {
        let mut manager = manager();
        let (conn, _endpoint) = open(&mut manager);
        join(&mut manager, conn);
        let body = manager.registry().avatar_for_connection(conn).unwrap().body;
        let before = manager.world().physics.transform(body).unwrap().position;

        manager
            .handle_message(conn, input(Vec3::splat(0.5)))
            .unwrap();

        assert_eq!(manager.step(), 1);
        let after = manager.world().physics.transform(body).unwrap().position;
        assert!(after.x > before.x);
        assert!(!manager.registry().avatar_for_connection(conn).unwrap().ready_for_simulation);
    }

    #[test]
    fn test_confirm_join_sends_client_init() {
        let mut manager = SessionManager::new(ServerConfig {
            confirm_join: true,
            ..ServerConfig::default()
        });
        let (conn, mut endpoint) = open(&mut manager);
        join(&mut manager, conn);

        let first = endpoint.from_server.try_recv().unwrap();
        assert_eq!(first.peek_type(), Some(MessageType::ClientInit));
    }

    #[test]
    fn test_scene_info_sent_once() {
        let mut manager = SessionManager::new(ServerConfig {
            environment_scene: "Playroom".to_string(),
            ..ServerConfig::default()
        });
        let (conn, mut endpoint) = open(&mut manager);
        let request = JoinRequest {
            send_scene_info: true,
            ..JoinRequest::default()
        };
        manager
            .handle_message(conn, request.to_message().unwrap())
            .unwrap();
        manager.render_frame();
        manager.handle_message(conn, input(Vec3::ZERO)).unwrap();
        manager.render_frame();

        let updates = frames(&mut endpoint);
        assert_eq!(updates.len(), 2);
        let info = updates[0].scene_info.as_ref().unwrap();
        assert!(info.iter().any(|[name, _]| name == "table"));
        assert!(updates[1].scene_info.is_none());
    }

    #[test]
    fn test_create_environment_and_scene_switch() {
        let mut manager = manager();
        let (conn, _endpoint) = open(&mut manager);

        let env = EnvironmentConfig {
            environment_scene: Some("Playroom".to_string()),
            observed_range: Some(2.5),
            ..EnvironmentConfig::default()
        };
        manager
            .handle_message(conn, env.to_message().unwrap())
            .unwrap();
        assert_eq!(manager.config().observed_range, 2.5);
        assert!(manager.world().semantics.lookup("table").is_some());

        // Scene switches need a joined avatar
        let switch = SceneSwitch::new("Empty").to_message().unwrap();
        assert!(matches!(
            manager.handle_message(conn, switch.clone()),
            Err(DispatchError::Orphan { .. })
        ));
        join(&mut manager, conn);
        manager.handle_message(conn, switch).unwrap();
        assert!(manager.world().semantics.is_empty());
        assert_eq!(manager.config().environment_scene, "Empty");
    }

    #[test]
    fn test_disconnect_releases_everything() {
        let mut manager = manager();
        let (conn, endpoint) = open(&mut manager);
        join(&mut manager, conn);
        let avatar = manager.registry().avatar_for_connection(conn).unwrap();
        let (avatar_id, body) = (avatar.id, avatar.body);

        drop(endpoint);
        manager.tick();

        assert!(manager.registry().is_empty());
        assert!(!manager.pipeline().is_pending(avatar_id));
        assert!(manager.world().physics.transform(body).is_none());
    }

    #[test]
    fn test_disconnect_of_last_unready_avatar_advances() {
        let mut manager = manager();
        let (a, _ea) = open(&mut manager);
        let (b, _eb) = open(&mut manager);
        join(&mut manager, a);
        join(&mut manager, b);

        manager.handle_message(a, input(Vec3::ZERO)).unwrap();
        assert_eq!(manager.step(), 0);

        manager.disconnect(b);
        assert_eq!(manager.step(), 1);
    }

    #[test]
    fn test_relations_discarded_after_all_frames() {
        let mut manager = manager();
        let (conn, _endpoint) = open(&mut manager);
        let request = JoinRequest {
            relationships: vec!["ALL".to_string()],
            ..JoinRequest::default()
        };
        manager
            .handle_message(conn, request.to_message().unwrap())
            .unwrap();
        manager.render_frame();
        manager.handle_message(conn, input(Vec3::ZERO)).unwrap();
        assert!(manager.published.is_some());

        manager.render_frame();
        assert!(manager.published.is_none());
    }

    #[test]
    fn test_await_environment_dispatches_earlier_messages() {
        let mut manager = manager();
        let (conn, endpoint) = open(&mut manager);
        endpoint
            .to_server
            .try_send(JoinRequest::default().to_message().unwrap())
            .unwrap();
        let env = EnvironmentConfig {
            environment_scene: Some("Playroom".to_string()),
            ..EnvironmentConfig::default()
        };
        endpoint.to_server.try_send(env.to_message().unwrap()).unwrap();

        tokio_test::block_on(manager.await_environment(conn)).unwrap();
        assert!(manager.registry().avatar_for_connection(conn).is_some());
        assert_eq!(manager.config().environment_scene, "Playroom");

        drop(endpoint);
        assert!(matches!(
            tokio_test::block_on(manager.await_environment(conn)),
            Err(DispatchError::ConnectionClosed(_))
        ));
    }
}
