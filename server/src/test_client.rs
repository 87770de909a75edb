//! In-process client for protocol self-tests
//!
//! Holds the client end of a loopback connection, joins on creation and
//! answers every `FRAME_UPDATE` with the next scripted input.

use crate::connection::LoopbackEndpoint;
use log::{debug, warn};
use shared::images::DebugImageExporter;
use shared::input::InputScript;
use shared::{FrameUpdate, JoinRequest, Message, MessageType, ProtocolError};
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

pub struct LoopbackClient {
    endpoint: LoopbackEndpoint,
    script: InputScript,
    exporter: Option<DebugImageExporter>,
    frames_received: u64,
    last_frame: Option<FrameUpdate>,
    disconnected: bool,
}

impl LoopbackClient {
    /// Sends `CLIENT_JOIN` right away.
    pub fn new(
        endpoint: LoopbackEndpoint,
        join: &JoinRequest,
        script: InputScript,
        exporter: Option<DebugImageExporter>,
    ) -> Result<Self, ProtocolError> {
        let client = Self {
            endpoint,
            script,
            exporter,
            frames_received: 0,
            last_frame: None,
            disconnected: false,
        };
        client.send(join.to_message()?);
        Ok(client)
    }

    /// Handles everything the server has sent so far; returns the number of messages.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while !self.disconnected {
            match self.endpoint.from_server.try_recv() {
                Ok(message) => {
                    self.handle(message);
                    handled += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.disconnected = true,
            }
        }
        handled
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn inputs_sent(&self) -> u64 {
        self.script.steps_sent()
    }

    pub fn last_frame(&self) -> Option<&FrameUpdate> {
        self.last_frame.as_ref()
    }

    pub fn exporter(&self) -> Option<&DebugImageExporter> {
        self.exporter.as_ref()
    }

    fn handle(&mut self, message: Message) {
        let envelope = match message.decode() {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Test client dropping message: {}", e);
                return;
            }
        };

        match envelope.msg_type {
            MessageType::FrameUpdate => {
                let update: FrameUpdate = match envelope.parse() {
                    Ok(update) => update,
                    Err(e) => {
                        warn!("Test client cannot read frame: {}", e);
                        return;
                    }
                };
                self.frames_received += 1;
                if let Some(exporter) = self.exporter.as_mut() {
                    if let Err(e) = exporter.save(message.binary_frames()) {
                        warn!("Cannot save debug images: {}", e);
                    }
                }
                self.last_frame = Some(update);

                match self.script.next_input().to_message() {
                    Ok(input) => self.send(input),
                    Err(e) => warn!("Test client cannot encode input: {}", e),
                }
            }
            MessageType::ClientInit => debug!("Test client join confirmed"),
            other => warn!("Test client ignoring {}", other),
        }
    }

    fn send(&self, message: Message) {
        match self.endpoint.to_server.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("Test client queue full, dropping message"),
            Err(TrySendError::Closed(_)) => debug!("Test client send after server side closed"),
        }
    }
}
