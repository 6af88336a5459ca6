use duel_core::{BattleId, PlayerId, Side};
use duel_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("battle not found: {0}")]
    BattleNotFound(BattleId),

    #[error("battle {0} has already ended")]
    BattleEnded(BattleId),

    #[error("not your turn - it's {0}'s turn")]
    NotYourTurn(Side),

    #[error("player {player} is not part of battle {battle}")]
    NotParticipant { battle: BattleId, player: PlayerId },

    #[error("no pokemon at position {0}")]
    NoSlotAtPosition(i64),

    #[error("cannot switch to a fainted pokemon (position {0})")]
    SlotFainted(i64),

    #[error("pokemon at position {0} is already active")]
    AlreadyActive(i64),

    #[error("player is already in the matchmaking queue")]
    AlreadyQueued,

    #[error("a match is already being set up for this player")]
    MatchPending,

    #[error("player is already in battle {0}")]
    AlreadyInBattle(BattleId),
}

impl EngineError {
    /// Rule violations the client caused, as opposed to storage failures.
    pub fn is_domain(&self) -> bool {
        !matches!(self, Self::Store(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Store(_) => "store",
            Self::BattleNotFound(_) => "battle_not_found",
            Self::BattleEnded(_) => "battle_ended",
            Self::NotYourTurn(_) => "not_your_turn",
            Self::NotParticipant { .. } => "not_participant",
            Self::NoSlotAtPosition(_) => "no_slot_at_position",
            Self::SlotFainted(_) => "slot_fainted",
            Self::AlreadyActive(_) => "already_active",
            Self::AlreadyQueued => "already_queued",
            Self::MatchPending => "match_pending",
            Self::AlreadyInBattle(_) => "already_in_battle",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_are_not_domain() {
        let err = EngineError::from(StoreError::Database("disk full".into()));
        assert!(!err.is_domain());
        assert_eq!(err.error_kind(), "store");
    }

    #[test]
    fn turn_message_names_the_player() {
        let err = EngineError::NotYourTurn(Side::Player1);
        assert!(err.is_domain());
        assert_eq!(err.to_string(), "not your turn - it's player1's turn");
    }
}
