pub mod errors;
pub mod ids;
pub mod messages;
pub mod protocol;
pub mod roster;
pub mod validation;

pub use errors::ErrorResponse;
pub use ids::{BattleId, PlayerId};
pub use protocol::{ClientMessageType, Envelope, ServerMessageType};
pub use roster::{RosterSlot, Side};
