//! Storage seam consumed by the battle engine.
//!
//! `Storage` is the whole persistence surface the engine and server touch.
//! `SqliteStorage` is the production implementation; tests can wrap it to
//! inject failures.

use duel_core::{BattleId, PlayerId, RosterSlot, Side};

use crate::battles::{BattleRepo, BattleRow};
use crate::database::Database;
use crate::error::StoreError;
use crate::users::{UserRepo, UserRow};

pub trait Storage: Send + Sync {
    /// Atomic: either the user and its full roster exist afterwards, or neither does.
    fn create_user_with_roster(
        &self,
        id: &PlayerId,
        username: &str,
        species_ids: &[i64],
    ) -> Result<UserRow, StoreError>;
    fn get_user(&self, id: &PlayerId) -> Result<UserRow, StoreError>;
    fn delete_user(&self, id: &PlayerId) -> Result<(), StoreError>;

    fn get_roster(&self, player: &PlayerId) -> Result<Vec<RosterSlot>, StoreError>;
    fn reset_roster(&self, player: &PlayerId) -> Result<(), StoreError>;
    fn update_slot_hp(&self, player: &PlayerId, position: i64, hp: i64) -> Result<i64, StoreError>;

    fn create_battle(
        &self,
        id: &BattleId,
        player1: &PlayerId,
        player2: &PlayerId,
        player1_active: i64,
        player2_active: i64,
    ) -> Result<BattleRow, StoreError>;
    fn get_battle(&self, id: &BattleId) -> Result<BattleRow, StoreError>;
    fn find_battle_for_player(&self, player: &PlayerId) -> Result<Option<BattleRow>, StoreError>;
    fn update_active_position(&self, id: &BattleId, side: Side, position: i64) -> Result<(), StoreError>;
    fn advance_turn(&self, id: &BattleId) -> Result<(), StoreError>;
    fn end_battle(&self, id: &BattleId, winner: &PlayerId) -> Result<(), StoreError>;
    fn delete_battle(&self, id: &BattleId) -> Result<(), StoreError>;
}

pub struct SqliteStorage {
    users: UserRepo,
    battles: BattleRepo,
}

impl SqliteStorage {
    pub fn new(db: Database) -> Self {
        Self {
            users: UserRepo::new(db.clone()),
            battles: BattleRepo::new(db),
        }
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::in_memory()?))
    }
}

impl Storage for SqliteStorage {
    fn create_user_with_roster(
        &self,
        id: &PlayerId,
        username: &str,
        species_ids: &[i64],
    ) -> Result<UserRow, StoreError> {
        self.users.create_with_roster(id, username, species_ids)
    }

    fn get_user(&self, id: &PlayerId) -> Result<UserRow, StoreError> {
        self.users.get(id)
    }

    fn delete_user(&self, id: &PlayerId) -> Result<(), StoreError> {
        self.users.delete(id)
    }

    fn get_roster(&self, player: &PlayerId) -> Result<Vec<RosterSlot>, StoreError> {
        self.users.roster(player)
    }

    fn reset_roster(&self, player: &PlayerId) -> Result<(), StoreError> {
        self.users.reset_roster(player)
    }

    fn update_slot_hp(&self, player: &PlayerId, position: i64, hp: i64) -> Result<i64, StoreError> {
        self.users.update_slot_hp(player, position, hp)
    }

    fn create_battle(
        &self,
        id: &BattleId,
        player1: &PlayerId,
        player2: &PlayerId,
        player1_active: i64,
        player2_active: i64,
    ) -> Result<BattleRow, StoreError> {
        self.battles
            .create(id, player1, player2, player1_active, player2_active)
    }

    fn get_battle(&self, id: &BattleId) -> Result<BattleRow, StoreError> {
        self.battles.get(id)
    }

    fn find_battle_for_player(&self, player: &PlayerId) -> Result<Option<BattleRow>, StoreError> {
        self.battles.find_active_for_player(player)
    }

    fn update_active_position(&self, id: &BattleId, side: Side, position: i64) -> Result<(), StoreError> {
        self.battles.update_active_position(id, side, position)
    }

    fn advance_turn(&self, id: &BattleId) -> Result<(), StoreError> {
        self.battles.advance_turn(id)
    }

    fn end_battle(&self, id: &BattleId, winner: &PlayerId) -> Result<(), StoreError> {
        self.battles.end(id, winner)
    }

    fn delete_battle(&self, id: &BattleId) -> Result<(), StoreError> {
        self.battles.delete(id)
    }
}
