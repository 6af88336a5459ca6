//! FIFO matchmaking queue.
//!
//! A newcomer is paired with the player who has waited longest; if nobody is
//! waiting the newcomer becomes the head. No skill or preference weighting.
//!
//! Both players of a pair stay marked as pairing until [`MatchmakingQueue::finish_pairing`]
//! is called, which must happen after their battle exists. Until then neither
//! can re-enter the queue.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use tracing::info;

use duel_core::PlayerId;

use crate::error::EngineError;

/// A player waiting for an opponent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedPlayer {
    pub player_id: PlayerId,
    pub username: String,
    /// Arrival order; strictly increasing across the queue's lifetime.
    pub enqueued_seq: u64,
}

#[derive(Default)]
struct QueueState {
    waiting: VecDeque<QueuedPlayer>,
    pairing: HashSet<PlayerId>,
    next_seq: u64,
}

#[derive(Default)]
pub struct MatchmakingQueue {
    state: Mutex<QueueState>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair the caller with the oldest waiting player, or enqueue the caller.
    ///
    /// Returns the matched opponent (already removed from the queue), or `None`
    /// when the caller was enqueued.
    pub fn enter(&self, player_id: PlayerId, username: &str) -> Result<Option<QueuedPlayer>, EngineError> {
        self.enter_guarded(player_id, username, || Ok(()))
    }

    /// [`enter`](Self::enter), with `guard` run under the queue lock first. A
    /// guard error rejects the caller without touching the queue.
    pub fn enter_guarded<F>(
        &self,
        player_id: PlayerId,
        username: &str,
        guard: F,
    ) -> Result<Option<QueuedPlayer>, EngineError>
    where
        F: FnOnce() -> Result<(), EngineError>,
    {
        let mut state = self.state.lock();

        if state.pairing.contains(&player_id) {
            return Err(EngineError::MatchPending);
        }
        if state.waiting.iter().any(|p| p.player_id == player_id) {
            return Err(EngineError::AlreadyQueued);
        }
        guard()?;

        if let Some(opponent) = state.waiting.pop_front() {
            state.pairing.insert(opponent.player_id);
            state.pairing.insert(player_id);
            info!(
                player1_id = %opponent.player_id,
                player1_username = %opponent.username,
                player2_id = %player_id,
                player2_username = %username,
                "match found"
            );
            return Ok(Some(opponent));
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.waiting.push_back(QueuedPlayer {
            player_id,
            username: username.to_string(),
            enqueued_seq: seq,
        });
        info!(
            player_id = %player_id,
            username = %username,
            queue_size = state.waiting.len(),
            "player entered matchmaking queue"
        );
        Ok(None)
    }

    /// Drop a player from the queue. No-op if absent.
    pub fn remove(&self, player_id: &PlayerId) -> bool {
        let mut state = self.state.lock();
        match state.waiting.iter().position(|p| p.player_id == *player_id) {
            Some(idx) => {
                if let Some(removed) = state.waiting.remove(idx) {
                    info!(
                        player_id = %removed.player_id,
                        username = %removed.username,
                        "player removed from matchmaking queue"
                    );
                }
                true
            }
            None => false,
        }
    }

    /// Release a pair returned by `enter`, whether or not its battle was created.
    pub fn finish_pairing(&self, player1: &PlayerId, player2: &PlayerId) {
        let mut state = self.state.lock();
        state.pairing.remove(player1);
        state.pairing.remove(player2);
    }

    pub fn contains(&self, player_id: &PlayerId) -> bool {
        self.state.lock().waiting.iter().any(|p| p.player_id == *player_id)
    }

    pub fn size(&self) -> usize {
        self.state.lock().waiting.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_player_waits() {
        let queue = MatchmakingQueue::new();
        let a = PlayerId::new();
        assert_eq!(queue.enter(a, "a").unwrap(), None);
        assert_eq!(queue.size(), 1);
        assert!(queue.contains(&a));
    }

    #[test]
    fn fifo_pairing() {
        let queue = MatchmakingQueue::new();
        let (a, b, c) = (PlayerId::new(), PlayerId::new(), PlayerId::new());

        assert!(queue.enter(a, "a").unwrap().is_none());
        let matched = queue.enter(b, "b").unwrap().unwrap();
        assert_eq!(matched.player_id, a);
        assert_eq!(queue.size(), 0);

        assert!(queue.enter(c, "c").unwrap().is_none());
        assert_eq!(queue.size(), 1);
        assert!(queue.contains(&c));
    }

    #[test]
    fn oldest_waiter_is_matched_first() {
        let queue = MatchmakingQueue::new();
        let (a, b, c) = (PlayerId::new(), PlayerId::new(), PlayerId::new());
        queue.enter(a, "a").unwrap();
        // Simulate a second waiter arriving through a separate path.
        {
            let mut state = queue.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.waiting.push_back(QueuedPlayer {
                player_id: b,
                username: "b".into(),
                enqueued_seq: seq,
            });
        }
        let matched = queue.enter(c, "c").unwrap().unwrap();
        assert_eq!(matched.player_id, a);
        assert!(matched.enqueued_seq < 1);
        assert!(queue.contains(&b));
    }

    #[test]
    fn double_enter_rejected() {
        let queue = MatchmakingQueue::new();
        let a = PlayerId::new();
        queue.enter(a, "a").unwrap();
        assert!(matches!(queue.enter(a, "a"), Err(EngineError::AlreadyQueued)));
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn removed_player_is_never_matched() {
        let queue = MatchmakingQueue::new();
        let (a, b) = (PlayerId::new(), PlayerId::new());
        queue.enter(a, "a").unwrap();
        assert!(queue.remove(&a));
        assert!(!queue.remove(&a));

        assert!(queue.enter(b, "b").unwrap().is_none());
        assert!(!queue.contains(&a));
    }

    #[test]
    fn paired_player_cannot_requeue_until_released() {
        let queue = MatchmakingQueue::new();
        let (a, b) = (PlayerId::new(), PlayerId::new());
        queue.enter(a, "a").unwrap();
        queue.enter(b, "b").unwrap().unwrap();

        assert!(matches!(queue.enter(a, "a"), Err(EngineError::MatchPending)));
        assert!(matches!(queue.enter(b, "b"), Err(EngineError::MatchPending)));
        assert_eq!(queue.size(), 0);

        queue.finish_pairing(&a, &b);
        assert!(queue.enter(a, "a").unwrap().is_none());
    }

    #[test]
    fn guard_rejection_leaves_queue_untouched() {
        let queue = MatchmakingQueue::new();
        let (a, b) = (PlayerId::new(), PlayerId::new());
        queue.enter(a, "a").unwrap();

        let battle = duel_core::BattleId::new();
        let result = queue.enter_guarded(b, "b", || Err(EngineError::AlreadyInBattle(battle)));
        assert!(matches!(result, Err(EngineError::AlreadyInBattle(id)) if id == battle));
        assert!(queue.contains(&a));
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn concurrent_entries_pair_everyone() {
        use std::sync::Arc;

        let queue = Arc::new(MatchmakingQueue::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || queue.enter(PlayerId::new(), &format!("p{i}")).unwrap())
            })
            .collect();
        let matches = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Option::is_some)
            .count();
        assert_eq!(matches, 4);
        assert_eq!(queue.size(), 0);
    }
}
