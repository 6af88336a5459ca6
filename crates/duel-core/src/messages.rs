//! Request and response payloads carried inside an [`Envelope`](crate::Envelope).

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::ids::{BattleId, PlayerId};
use crate::roster::RosterSlot;

// ── Client → server ──

#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
pub struct ConnectRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "is required"))]
    pub username: String,
    #[serde(default)]
    #[validate(length(equal = 3, message = "must contain exactly 3 species ids"))]
    pub pokemons: Vec<i64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
pub struct AttackRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "is required"))]
    pub battle_id: String,
    #[serde(default)]
    #[validate(range(min = 1, message = "must be at least 1"))]
    pub move_id: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
pub struct ChangePokemonRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "is required"))]
    pub battle_id: String,
    #[serde(default)]
    #[validate(range(min = 1, message = "must be at least 1"))]
    pub position: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
pub struct SurrenderRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "is required"))]
    pub battle_id: String,
}

// ── Server → client ──

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AcceptConnectionResponse {
    pub username: String,
    pub id: PlayerId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub username: String,
    pub player_id: PlayerId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueJoinedResponse {
    pub message: String,
    pub queue_size: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PokemonInfo {
    pub species_id: i64,
    pub position: i64,
    pub current_hp: i64,
    pub is_fainted: bool,
}

impl From<&RosterSlot> for PokemonInfo {
    fn from(slot: &RosterSlot) -> Self {
        Self {
            species_id: slot.species_id,
            position: slot.position,
            current_hp: slot.current_hp,
            is_fainted: slot.fainted,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerBattleInfo {
    pub player_id: PlayerId,
    pub username: String,
    pub team: Vec<PokemonInfo>,
    pub active_pokemon: i64,
}

/// Shared shape for Attack, ChangePokemon and BattleEnded frames.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BattleStateResponse {
    pub battle_id: BattleId,
    pub message: String,
    pub your_info: PlayerBattleInfo,
    pub opponent_info: PlayerBattleInfo,
    pub battle_ended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<PlayerId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchFoundResponse {
    pub battle_id: BattleId,
    pub opponent_id: PlayerId,
    pub opponent_username: String,
    pub your_info: PlayerBattleInfo,
    pub opponent_info: PlayerBattleInfo,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DisconnectNotice {
    pub battle_id: BattleId,
    pub player_id: PlayerId,
    pub message: String,
}
