use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use duel_core::{Envelope, PlayerId};
use duel_engine::MatchmakingQueue;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("player {0} already has a session")]
    AlreadyRegistered(PlayerId),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("player {0} is not connected")]
    NotConnected(PlayerId),
    #[error("outbound queue full for player {0}")]
    QueueFull(PlayerId),
    #[error("session for player {0} is closed")]
    Closed(PlayerId),
}

/// A connected, handshaken player.
pub struct Session {
    pub player_id: PlayerId,
    pub username: String,
    tx: mpsc::Sender<Envelope>,
    cancel: CancellationToken,
    last_pong: Mutex<Instant>,
}

impl Session {
    pub fn new(
        player_id: PlayerId,
        username: impl Into<String>,
        tx: mpsc::Sender<Envelope>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            player_id,
            username: username.into(),
            tx,
            cancel,
            last_pong: Mutex::new(Instant::now()),
        }
    }

    /// Push a frame onto the outbound queue, waiting at most `timeout` for room.
    pub async fn enqueue(&self, envelope: Envelope, timeout: Duration) -> Result<(), DeliveryError> {
        if self.cancel.is_cancelled() {
            return Err(DeliveryError::Closed(self.player_id));
        }
        match self.tx.send_timeout(envelope, timeout).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(DeliveryError::QueueFull(self.player_id)),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(DeliveryError::Closed(self.player_id)),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn record_pong(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    /// Whether a pong (or the session start) was seen within `timeout`.
    pub fn is_alive(&self, timeout: Duration) -> bool {
        self.last_pong.lock().elapsed() < timeout
    }
}

/// Live sessions keyed by player id.
///
/// Removal, queue purge and cancellation happen under the same write lock, so
/// a player can never be matched after its session is gone.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<PlayerId, Arc<Session>>>,
    queue: Arc<MatchmakingQueue>,
    send_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(queue: Arc<MatchmakingQueue>, send_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            queue,
            send_timeout,
        }
    }

    pub fn add(&self, session: Arc<Session>) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.player_id) {
            return Err(RegistryError::AlreadyRegistered(session.player_id));
        }
        tracing::info!(
            player_id = %session.player_id,
            username = %session.username,
            "session registered"
        );
        sessions.insert(session.player_id, session);
        Ok(())
    }

    /// Idempotent.
    pub fn remove(&self, player_id: &PlayerId) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write();
        self.queue.remove(player_id);
        let removed = sessions.remove(player_id);
        if let Some(session) = &removed {
            session.cancel.cancel();
            tracing::info!(
                player_id = %player_id,
                username = %session.username,
                "session removed"
            );
        }
        removed
    }

    pub fn get(&self, player_id: &PlayerId) -> Option<Arc<Session>> {
        self.sessions.read().get(player_id).cloned()
    }

    /// Deliver a frame to another player's session.
    pub async fn send(&self, player_id: &PlayerId, envelope: Envelope) -> Result<(), DeliveryError> {
        let session = self
            .get(player_id)
            .ok_or(DeliveryError::NotConnected(*player_id))?;
        let result = session.enqueue(envelope, self.send_timeout).await;
        if let Err(DeliveryError::QueueFull(_)) = &result {
            tracing::warn!(player_id = %player_id, "send queue full, dropping message");
        }
        result
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }
}
