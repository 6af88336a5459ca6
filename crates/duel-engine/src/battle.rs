//! Battle state machine.
//!
//! Every mutating operation on a battle runs under that battle's lock, so two
//! concurrent requests cannot both pass the turn check for the same turn.
//! Storage calls are synchronous; the lock is a `parking_lot` mutex and is
//! never held across an await point.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use duel_core::messages::{BattleStateResponse, MatchFoundResponse, PlayerBattleInfo, PokemonInfo};
use duel_core::roster::all_fainted;
use duel_core::{BattleId, PlayerId, RosterSlot, Side};
use duel_store::{BattleRow, Storage, StoreError};

use crate::error::EngineError;

/// HP removed by every attack. The move id does not influence damage.
pub const DEFAULT_BASE_DAMAGE: i64 = 10;

/// One side of a battle as seen after an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerView {
    pub player_id: PlayerId,
    pub username: String,
    pub roster: Vec<RosterSlot>,
    pub active_position: i64,
}

impl PlayerView {
    pub fn to_info(&self) -> PlayerBattleInfo {
        PlayerBattleInfo {
            player_id: self.player_id,
            username: self.username.clone(),
            team: self.roster.iter().map(PokemonInfo::from).collect(),
            active_pokemon: self.active_position,
        }
    }
}

/// Post-operation state of a battle, for both participants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BattleSnapshot {
    pub battle_id: BattleId,
    pub message: String,
    pub player1: PlayerView,
    pub player2: PlayerView,
    pub current_turn: i64,
    pub ended: bool,
    pub winner: Option<PlayerId>,
}

impl BattleSnapshot {
    fn view(&self, side: Side) -> &PlayerView {
        match side {
            Side::Player1 => &self.player1,
            Side::Player2 => &self.player2,
        }
    }

    fn side_of(&self, player: &PlayerId) -> Option<Side> {
        if *player == self.player1.player_id {
            Some(Side::Player1)
        } else if *player == self.player2.player_id {
            Some(Side::Player2)
        } else {
            None
        }
    }

    /// `(yours, opponent's)` from `player`'s perspective.
    pub fn views_for(&self, player: &PlayerId) -> Option<(&PlayerView, &PlayerView)> {
        let side = self.side_of(player)?;
        Some((self.view(side), self.view(side.other())))
    }

    pub fn opponent_of(&self, player: &PlayerId) -> Option<PlayerId> {
        self.side_of(player).map(|side| self.view(side.other()).player_id)
    }

    pub fn state_for(&self, player: &PlayerId) -> Option<BattleStateResponse> {
        let (yours, theirs) = self.views_for(player)?;
        Some(BattleStateResponse {
            battle_id: self.battle_id,
            message: self.message.clone(),
            your_info: yours.to_info(),
            opponent_info: theirs.to_info(),
            battle_ended: self.ended,
            winner: self.winner,
        })
    }

    pub fn match_found_for(&self, player: &PlayerId) -> Option<MatchFoundResponse> {
        let (yours, theirs) = self.views_for(player)?;
        Some(MatchFoundResponse {
            battle_id: self.battle_id,
            opponent_id: theirs.player_id,
            opponent_username: theirs.username.clone(),
            your_info: yours.to_info(),
            opponent_info: theirs.to_info(),
        })
    }
}

pub struct BattleService {
    storage: Arc<dyn Storage>,
    base_damage: i64,
    locks: DashMap<BattleId, Arc<Mutex<()>>>,
}

impl BattleService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_damage(storage, DEFAULT_BASE_DAMAGE)
    }

    /// Negative damage is treated as zero; attacks never heal.
    pub fn with_damage(storage: Arc<dyn Storage>, base_damage: i64) -> Self {
        Self {
            storage,
            base_damage: base_damage.max(0),
            locks: DashMap::new(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Start a battle between two matched players. Both rosters are restored
    /// to full health and each side's first slot becomes active.
    #[instrument(skip_all, fields(player1 = %player1, player2 = %player2))]
    pub fn create_battle(&self, player1: &PlayerId, player2: &PlayerId) -> Result<BattleSnapshot, EngineError> {
        for player in [player1, player2] {
            if let Some(existing) = self.storage.find_battle_for_player(player)? {
                return Err(EngineError::AlreadyInBattle(existing.id));
            }
        }

        self.storage.reset_roster(player1)?;
        self.storage.reset_roster(player2)?;
        let roster1 = self.storage.get_roster(player1)?;
        let roster2 = self.storage.get_roster(player2)?;
        let (Some(first1), Some(first2)) = (roster1.first(), roster2.first()) else {
            return Err(StoreError::NotFound("empty roster".into()).into());
        };

        let id = BattleId::new();
        let row = self
            .storage
            .create_battle(&id, player1, player2, first1.position, first2.position)?;
        info!(battle_id = %id, "battle created");

        self.snapshot(&row, roster1, roster2, "Battle started".to_string(), None)
    }

    /// Deal fixed damage to the defender's active unit and pass the turn.
    ///
    /// If the unit faints and another healthy slot exists, the defender's
    /// active position moves to the first such slot. When the defender has no
    /// healthy slots left the battle is marked ended with the attacker as winner.
    #[instrument(skip_all, fields(battle_id = %battle_id, attacker = %attacker, defender = %defender, move_id = move_id))]
    pub fn attack(
        &self,
        battle_id: &BattleId,
        attacker: &PlayerId,
        defender: &PlayerId,
        move_id: i64,
    ) -> Result<BattleSnapshot, EngineError> {
        let lock = self.lock_for(battle_id);
        let _guard = lock.lock();

        let battle = self.load_open(battle_id)?;
        let attacker_side = self.check_turn(&battle, attacker)?;
        let defender_side = attacker_side.other();
        if battle.player(defender_side) != *defender {
            return Err(EngineError::NotParticipant {
                battle: *battle_id,
                player: *defender,
            });
        }

        let target_position = battle.active_position(defender_side);
        let defender_roster = self.storage.get_roster(defender)?;
        let target = defender_roster
            .iter()
            .find(|slot| slot.position == target_position)
            .ok_or(EngineError::NoSlotAtPosition(target_position))?;

        let new_hp = self
            .storage
            .update_slot_hp(defender, target_position, target.current_hp - self.base_damage)?;
        let fainted = new_hp == 0;

        if fainted {
            if let Some(next) = next_available(&defender_roster, target_position) {
                self.storage
                    .update_active_position(battle_id, defender_side, next.position)?;
                debug!(position = next.position, "defender auto-switched");
            }
        }
        self.storage.advance_turn(battle_id)?;

        let mut message = format!("Attack dealt {} damage! Defender's HP: {new_hp}", self.base_damage);
        if fainted {
            message.push_str(" - Pokemon fainted!");
        }
        self.reload(battle_id, message)
    }

    /// Make `position` the caller's active unit. Consumes the caller's turn.
    #[instrument(skip_all, fields(battle_id = %battle_id, player = %player, opponent = %opponent, position = position))]
    pub fn switch(
        &self,
        battle_id: &BattleId,
        player: &PlayerId,
        opponent: &PlayerId,
        position: i64,
    ) -> Result<BattleSnapshot, EngineError> {
        let lock = self.lock_for(battle_id);
        let _guard = lock.lock();

        let battle = self.load_open(battle_id)?;
        let side = self.check_turn(&battle, player)?;
        if battle.player(side.other()) != *opponent {
            return Err(EngineError::NotParticipant {
                battle: *battle_id,
                player: *opponent,
            });
        }

        let roster = self.storage.get_roster(player)?;
        let slot = roster
            .iter()
            .find(|slot| slot.position == position)
            .ok_or(EngineError::NoSlotAtPosition(position))?;
        if !slot.is_available() {
            return Err(EngineError::SlotFainted(position));
        }
        if battle.active_position(side) == position {
            return Err(EngineError::AlreadyActive(position));
        }

        self.storage.update_active_position(battle_id, side, position)?;
        self.storage.advance_turn(battle_id)?;

        let message = format!("Switched to species {} (position {position})", slot.species_id);
        self.reload(battle_id, message)
    }

    /// Concede. Allowed on either player's turn; the opponent wins.
    #[instrument(skip_all, fields(battle_id = %battle_id, player = %player))]
    pub fn surrender(&self, battle_id: &BattleId, player: &PlayerId) -> Result<BattleSnapshot, EngineError> {
        let lock = self.lock_for(battle_id);
        let _guard = lock.lock();

        let battle = self.load_open(battle_id)?;
        let side = battle.side_of(player).ok_or(EngineError::NotParticipant {
            battle: *battle_id,
            player: *player,
        })?;
        let winner = battle.player(side.other());
        self.storage.end_battle(battle_id, &winner)?;

        let username = self.storage.get_user(player)?.username;
        info!(winner = %winner, "battle surrendered");
        self.reload(battle_id, format!("{username} surrendered"))
    }

    /// Remove a battle record and its lock.
    #[instrument(skip_all, fields(battle_id = %battle_id))]
    pub fn delete_battle(&self, battle_id: &BattleId) -> Result<(), EngineError> {
        let result = self.storage.delete_battle(battle_id);
        self.locks.remove(battle_id);
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Err(EngineError::BattleNotFound(*battle_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// The unfinished battle `player` is in, if any.
    pub fn battle_for_player(&self, player: &PlayerId) -> Result<Option<BattleRow>, EngineError> {
        Ok(self.storage.find_battle_for_player(player)?)
    }

    /// The other participant of `battle_id`.
    pub fn opponent_of(&self, battle_id: &BattleId, player: &PlayerId) -> Result<PlayerId, EngineError> {
        let battle = self.load(battle_id)?;
        battle.opponent_of(player).ok_or(EngineError::NotParticipant {
            battle: *battle_id,
            player: *player,
        })
    }

    /// End and delete the battle a departing player was in, if any. The
    /// remaining player is recorded as winner. Returns the forfeited battle.
    #[instrument(skip_all, fields(player = %player))]
    pub fn forfeit(&self, player: &PlayerId) -> Result<Option<BattleRow>, EngineError> {
        let Some(battle) = self.storage.find_battle_for_player(player)? else {
            return Ok(None);
        };
        {
            let lock = self.lock_for(&battle.id);
            let _guard = lock.lock();
            if let Some(winner) = battle.opponent_of(player) {
                match self.storage.end_battle(&battle.id, &winner) {
                    Ok(()) => {}
                    // Another operation finished the battle first.
                    Err(StoreError::Conflict(_)) | Err(StoreError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        match self.delete_battle(&battle.id) {
            Ok(()) | Err(EngineError::BattleNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        warn!(battle_id = %battle.id, "battle forfeited on disconnect");
        Ok(Some(battle))
    }

    fn lock_for(&self, battle_id: &BattleId) -> Arc<Mutex<()>> {
        self.locks.entry(*battle_id).or_default().clone()
    }

    fn load(&self, battle_id: &BattleId) -> Result<BattleRow, EngineError> {
        match self.storage.get_battle(battle_id) {
            Ok(row) => Ok(row),
            Err(e) if e.is_not_found() => {
                self.locks.remove(battle_id);
                Err(EngineError::BattleNotFound(*battle_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn load_open(&self, battle_id: &BattleId) -> Result<BattleRow, EngineError> {
        let battle = self.load(battle_id)?;
        if battle.ended {
            return Err(EngineError::BattleEnded(*battle_id));
        }
        Ok(battle)
    }

    /// Seat of `player`, provided it is their turn.
    fn check_turn(&self, battle: &BattleRow, player: &PlayerId) -> Result<Side, EngineError> {
        let side = battle.side_of(player).ok_or(EngineError::NotParticipant {
            battle: battle.id,
            player: *player,
        })?;
        let turn = battle.turn_side();
        if side != turn {
            return Err(EngineError::NotYourTurn(turn));
        }
        Ok(side)
    }

    fn reload(&self, battle_id: &BattleId, message: String) -> Result<BattleSnapshot, EngineError> {
        let battle = self.load(battle_id)?;
        let roster1 = self.storage.get_roster(&battle.player1_id)?;
        let roster2 = self.storage.get_roster(&battle.player2_id)?;
        let winner = if battle.ended {
            battle.winner_id
        } else {
            let winner = decide_winner(&battle, &roster1, &roster2);
            if let Some(winner) = winner {
                self.storage.end_battle(battle_id, &winner)?;
                info!(winner = %winner, "battle ended");
            }
            winner
        };
        self.snapshot(&battle, roster1, roster2, message, winner)
    }

    fn snapshot(
        &self,
        battle: &BattleRow,
        roster1: Vec<RosterSlot>,
        roster2: Vec<RosterSlot>,
        message: String,
        winner: Option<PlayerId>,
    ) -> Result<BattleSnapshot, EngineError> {
        let user1 = self.storage.get_user(&battle.player1_id)?;
        let user2 = self.storage.get_user(&battle.player2_id)?;
        Ok(BattleSnapshot {
            battle_id: battle.id,
            message,
            player1: PlayerView {
                player_id: battle.player1_id,
                username: user1.username,
                roster: roster1,
                active_position: battle.player1_active_position,
            },
            player2: PlayerView {
                player_id: battle.player2_id,
                username: user2.username,
                roster: roster2,
                active_position: battle.player2_active_position,
            },
            current_turn: battle.current_turn,
            ended: winner.is_some(),
            winner,
        })
    }
}

/// First healthy slot in roster order, excluding `skip`.
fn next_available(roster: &[RosterSlot], skip: i64) -> Option<&RosterSlot> {
    roster
        .iter()
        .find(|slot| slot.position != skip && slot.is_available())
}

/// Player1's wipe is checked first.
fn decide_winner(battle: &BattleRow, roster1: &[RosterSlot], roster2: &[RosterSlot]) -> Option<PlayerId> {
    if all_fainted(roster1) {
        Some(battle.player2_id)
    } else if all_fainted(roster2) {
        Some(battle.player1_id)
    } else {
        None
    }
}
