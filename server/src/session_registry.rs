//! Connection and avatar session bookkeeping
//!
//! One registry keyed by connection identity holds, per connection:
//! - the transport [`Connection`]
//! - its dispatch state (`AwaitingJoin`, `Active`, `Closed`)
//! - the bound [`AvatarSession`], if the client has joined
//! - the in-process [`LoopbackClient`], for self-test connections
//!
//! Avatar-for-connection and connection-for-avatar are derived lookups over
//! this single table, so there is no second map that could drift out of sync.

use crate::avatar::{AvatarId, AvatarSession};
use crate::connection::{Connection, ConnectionId, TransportError};
use crate::test_client::LoopbackClient;
use log::info;
use shared::Message;
use std::collections::BTreeMap;

/// Dispatch state of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingJoin,
    Active,
    Closed,
}

/// Everything the server holds for one connection
pub struct ConnectionEntry {
    pub connection: Connection,
    pub state: ConnectionState,
    pub avatar: Option<AvatarSession>,
    pub test_client: Option<LoopbackClient>,
}

/// Manages all connections and the avatar sessions bound to them
///
/// Connection and avatar ids both start from 1 and are never reused, so a
/// stale id held by a pending capture can never address a newer session.
pub struct SessionRegistry {
    /// Connections indexed by id, iterated in connection order
    entries: BTreeMap<ConnectionId, ConnectionEntry>,
    next_connection_id: ConnectionId,
    next_avatar_id: AvatarId,
    /// Maximum number of concurrent connections
    max_connections: usize,
}

impl SessionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            next_connection_id: 1,
            next_avatar_id: 1,
            max_connections,
        }
    }

    /// Registers a new connection built by `open` with the assigned id
    ///
    /// Returns None without calling `open` if the server is at capacity.
    pub fn add_connection(
        &mut self,
        open: impl FnOnce(ConnectionId) -> Connection,
    ) -> Option<ConnectionId> {
        if self.entries.len() >= self.max_connections {
            return None;
        }

        let id = self.next_connection_id;
        self.next_connection_id += 1;

        let connection = open(id);
        info!("Connection {} opened from {}", id, connection.peer());
        self.entries.insert(
            id,
            ConnectionEntry {
                connection,
                state: ConnectionState::AwaitingJoin,
                avatar: None,
                test_client: None,
            },
        );
        Some(id)
    }

    /// Binds an in-process client to a loopback connection
    pub fn attach_test_client(&mut self, id: ConnectionId, client: LoopbackClient) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.test_client = Some(client);
                true
            }
            None => false,
        }
    }

    /// Removes a connection and closes its transport
    ///
    /// The returned entry still owns the avatar session (if any) so the
    /// caller can release its world resources.
    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<ConnectionEntry> {
        let mut entry = self.entries.remove(&id)?;
        entry.state = ConnectionState::Closed;
        entry.connection.close();
        info!("Connection {} removed", id);
        Some(entry)
    }

    pub fn allocate_avatar_id(&mut self) -> AvatarId {
        let id = self.next_avatar_id;
        self.next_avatar_id += 1;
        id
    }

    pub fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.entries.get(&id).map(|e| e.state)
    }

    pub fn entry_mut(&mut self, id: ConnectionId) -> Option<&mut ConnectionEntry> {
        self.entries.get_mut(&id)
    }

    /// Detaches the connection's current avatar, leaving it awaiting a join
    pub fn take_avatar(&mut self, id: ConnectionId) -> Option<AvatarSession> {
        let entry = self.entries.get_mut(&id)?;
        entry.state = ConnectionState::AwaitingJoin;
        entry.avatar.take()
    }

    /// Binds `avatar` to its connection and marks the connection active
    ///
    /// Any previous session must have been taken first; the avatar is handed
    /// back if the connection is unknown or still holds one.
    pub fn install_avatar(&mut self, avatar: AvatarSession) -> Result<(), AvatarSession> {
        match self.entries.get_mut(&avatar.connection) {
            Some(entry) if entry.avatar.is_none() => {
                entry.avatar = Some(avatar);
                entry.state = ConnectionState::Active;
                Ok(())
            }
            _ => Err(avatar),
        }
    }

    pub fn avatar_for_connection(&self, id: ConnectionId) -> Option<&AvatarSession> {
        self.entries.get(&id).and_then(|e| e.avatar.as_ref())
    }

    pub fn avatar_for_connection_mut(&mut self, id: ConnectionId) -> Option<&mut AvatarSession> {
        self.entries.get_mut(&id).and_then(|e| e.avatar.as_mut())
    }

    pub fn connection_for_avatar(&self, avatar: AvatarId) -> Option<ConnectionId> {
        self.avatars().find(|a| a.id == avatar).map(|a| a.connection)
    }

    pub fn avatar_mut(&mut self, avatar: AvatarId) -> Option<&mut AvatarSession> {
        self.avatars_mut().find(|a| a.id == avatar)
    }

    pub fn avatars(&self) -> impl Iterator<Item = &AvatarSession> {
        self.entries.values().filter_map(|e| e.avatar.as_ref())
    }

    pub fn avatars_mut(&mut self) -> impl Iterator<Item = &mut AvatarSession> {
        self.entries.values_mut().filter_map(|e| e.avatar.as_mut())
    }

    pub fn avatar_ids(&self) -> Vec<AvatarId> {
        self.avatars().map(|a| a.id).collect()
    }

    pub fn avatar_count(&self) -> usize {
        self.avatars().count()
    }

    /// True when at least one avatar exists and every avatar is ready
    pub fn all_ready(&self) -> bool {
        let mut any = false;
        for avatar in self.avatars() {
            if !avatar.ready_for_simulation {
                return false;
            }
            any = true;
        }
        any
    }

    /// Loopback connections with an attached client
    pub fn test_clients_mut(&mut self) -> impl Iterator<Item = &mut LoopbackClient> {
        self.entries
            .values_mut()
            .filter_map(|e| e.test_client.as_mut())
    }

    pub fn test_client(&self, id: ConnectionId) -> Option<&LoopbackClient> {
        self.entries.get(&id).and_then(|e| e.test_client.as_ref())
    }

    pub fn send_to(&self, id: ConnectionId, message: Message) -> Result<(), TransportError> {
        self.entries
            .get(&id)
            .ok_or(TransportError::Closed(id))?
            .connection
            .send(message)
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.entries.keys().copied().collect()
    }

    /// Returns the number of open connections
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
