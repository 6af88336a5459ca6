pub mod battle;
pub mod error;
pub mod matchmaking;

pub use battle::{BattleService, BattleSnapshot, PlayerView, DEFAULT_BASE_DAMAGE};
pub use error::EngineError;
pub use matchmaking::{MatchmakingQueue, QueuedPlayer};
