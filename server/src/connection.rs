//! Client connections
//!
//! A [`Connection`] hides where messages come from. TCP connections run one
//! reader and one writer task that move whole messages over channels;
//! loopback connections are just the channel pair with an in-process client
//! holding the other end. Either way the session manager polls without
//! blocking and sends without waiting.
//!
//! Inbound queues hold at most [`INBOUND_QUEUE`] messages. A TCP reader that
//! finds the queue full stops reading, so a fast peer fills its own socket
//! buffers instead of server memory.

use log::{debug, info, warn};
use shared::protocol::Message;
use shared::wire::{self, ReadOutcome};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;

pub type ConnectionId = u32;

/// Messages buffered per connection before the reader waits
pub const INBOUND_QUEUE: usize = 32;

/// Result of a non-blocking poll
#[derive(Debug)]
pub enum Poll {
    Message(Message),
    /// Nothing pending this tick
    Idle,
    /// The peer went away; no more messages will arrive
    Closed,
}

#[derive(Debug, Error, PartialEq)]
pub enum TransportError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

pub struct Connection {
    id: ConnectionId,
    peer: String,
    inbound: mpsc::Receiver<Message>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    reader: Option<JoinHandle<()>>,
    closed: bool,
}

/// Client side of a loopback connection
pub struct LoopbackEndpoint {
    pub to_server: mpsc::Sender<Message>,
    pub from_server: mpsc::UnboundedReceiver<Message>,
}

impl Connection {
    /// Starts reader and writer tasks for an accepted stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(id: ConnectionId, stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Cannot set TCP_NODELAY for connection {}: {}", id, e);
        }
        let (mut read_half, mut write_half) = stream.into_split();
        let (inbound_tx, inbound) = mpsc::channel(INBOUND_QUEUE);
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        let reader = tokio::spawn(async move {
            loop {
                match wire::read_message(&mut read_half).await {
                    Ok(ReadOutcome::Message(message)) => {
                        if inbound_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Ok(ReadOutcome::Undecodable(e)) => {
                        warn!("Dropping undecodable message on connection {}: {}", id, e);
                    }
                    Ok(ReadOutcome::Eof) => {
                        info!("Connection {} closed by peer", id);
                        break;
                    }
                    Err(e) => {
                        warn!("Read error on connection {}: {}", id, e);
                        break;
                    }
                }
            }
        });

        // Ends once every sender is dropped and the queue is flushed
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = wire::write_message(&mut write_half, &message).await {
                    warn!("Write error on connection {}: {}", id, e);
                    break;
                }
            }
        });

        Self {
            id,
            peer,
            inbound,
            outbound: Some(outbound),
            reader: Some(reader),
            closed: false,
        }
    }

    /// In-memory connection paired with a client endpoint. Needs no runtime.
    pub fn loopback(id: ConnectionId) -> (Self, LoopbackEndpoint) {
        let (to_server, inbound) = mpsc::channel(INBOUND_QUEUE);
        let (outbound, from_server) = mpsc::unbounded_channel();

        let connection = Self {
            id,
            peer: "loopback".to_string(),
            inbound,
            outbound: Some(outbound),
            reader: None,
            closed: false,
        };
        (
            connection,
            LoopbackEndpoint {
                to_server,
                from_server,
            },
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns at most one pending message without waiting.
    pub fn poll(&mut self) -> Poll {
        if self.closed {
            return Poll::Closed;
        }
        match self.inbound.try_recv() {
            Ok(message) => Poll::Message(message),
            Err(TryRecvError::Empty) => Poll::Idle,
            Err(TryRecvError::Disconnected) => Poll::Closed,
        }
    }

    /// Waits for the next message; `None` once the peer is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        if self.closed {
            return None;
        }
        self.inbound.recv().await
    }

    pub fn send(&self, message: Message) -> Result<(), TransportError> {
        self.outbound
            .as_ref()
            .ok_or(TransportError::Closed(self.id))?
            .send(message)
            .map_err(|_| TransportError::Closed(self.id))
    }

    /// Releases channels and tasks. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.outbound = None;
        self.inbound.close();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        debug!("Connection {} ({}) released", self.id, self.peer);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::MessageType;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[test]
    fn test_loopback_poll_and_send() {
        let (mut connection, mut endpoint) = Connection::loopback(3);
        assert!(matches!(connection.poll(), Poll::Idle));

        endpoint
            .to_server
            .try_send(Message::bare(&MessageType::ClientJoin))
            .unwrap();
        match connection.poll() {
            Poll::Message(m) => assert_eq!(m.peek_type(), Some(MessageType::ClientJoin)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(connection.poll(), Poll::Idle));

        connection
            .send(Message::bare(&MessageType::ClientInit))
            .unwrap();
        assert_eq!(
            endpoint.from_server.try_recv().unwrap().peek_type(),
            Some(MessageType::ClientInit)
        );
    }

    #[test]
    fn test_poll_reports_closed_peer() {
        let (mut connection, endpoint) = Connection::loopback(1);
        drop(endpoint);
        assert!(matches!(connection.poll(), Poll::Closed));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut connection, _endpoint) = Connection::loopback(1);
        connection.close();
        connection.close();

        assert!(connection.is_closed());
        assert!(matches!(connection.poll(), Poll::Closed));
        assert_eq!(
            connection.send(Message::bare(&MessageType::ClientInit)),
            Err(TransportError::Closed(1))
        );
    }

    #[tokio::test]
    async fn test_tcp_connection_moves_messages() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let mut connection = Connection::spawn(5, stream);

        wire::write_message(&mut client, &Message::bare(&MessageType::ClientJoin))
            .await
            .unwrap();
        let received = connection.recv().await.unwrap();
        assert_eq!(received.peek_type(), Some(MessageType::ClientJoin));

        connection
            .send(Message::bare(&MessageType::ClientInit))
            .unwrap();
        match wire::read_message(&mut client).await.unwrap() {
            ReadOutcome::Message(m) => assert_eq!(m.peek_type(), Some(MessageType::ClientInit)),
            other => panic!("unexpected {:?}", other),
        }

        drop(client);
        assert!(connection.recv().await.is_none());
        assert!(matches!(connection.poll(), Poll::Closed));
    }

    #[tokio::test]
    async fn test_flooding_peer_is_held_back() {
        const SENT: usize = 2_000;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let mut connection = Connection::spawn(7, stream);

        let writer = tokio::spawn(async move {
            let input = Message::bare(&MessageType::ClientInput);
            for _ in 0..SENT {
                wire::write_message(&mut client, &input).await.unwrap();
            }
            client
        });
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Nothing runs between polls, so each burst is what was buffered
        let mut bursts = Vec::new();
        let mut buffered = 0;
        let mut received = 0;
        for _ in 0..10_000 {
            match connection.poll() {
                Poll::Message(_) => {
                    buffered += 1;
                    received += 1;
                }
                Poll::Idle => {
                    if buffered > 0 {
                        bursts.push(buffered);
                        buffered = 0;
                    }
                    if received == SENT {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                Poll::Closed => panic!("connection closed early"),
            }
        }

        assert_eq!(received, SENT);
        assert_eq!(bursts[0], INBOUND_QUEUE);
        assert!(bursts.iter().all(|&n| n <= INBOUND_QUEUE));
        drop(writer.await.unwrap());
    }
}
