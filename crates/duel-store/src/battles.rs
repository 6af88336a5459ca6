use chrono::Utc;
use tracing::instrument;

use duel_core::{BattleId, PlayerId, Side};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BattleRow {
    pub id: BattleId,
    pub player1_id: PlayerId,
    pub player2_id: PlayerId,
    pub player1_active_position: i64,
    pub player2_active_position: i64,
    pub current_turn: i64,
    pub ended: bool,
    pub winner_id: Option<PlayerId>,
    pub created_at: String,
}

impl BattleRow {
    pub fn player(&self, side: Side) -> PlayerId {
        match side {
            Side::Player1 => self.player1_id,
            Side::Player2 => self.player2_id,
        }
    }

    pub fn active_position(&self, side: Side) -> i64 {
        match side {
            Side::Player1 => self.player1_active_position,
            Side::Player2 => self.player2_active_position,
        }
    }

    /// Seat of `player`, or `None` if they are not in this battle.
    pub fn side_of(&self, player: &PlayerId) -> Option<Side> {
        if *player == self.player1_id {
            Some(Side::Player1)
        } else if *player == self.player2_id {
            Some(Side::Player2)
        } else {
            None
        }
    }

    pub fn opponent_of(&self, player: &PlayerId) -> Option<PlayerId> {
        self.side_of(player).map(|side| self.player(side.other()))
    }

    /// Whose move it is by turn parity.
    pub fn turn_side(&self) -> Side {
        Side::for_turn(self.current_turn)
    }
}

const SELECT_BATTLE: &str = "SELECT id, player1_id, player2_id, player1_active_position,
        player2_active_position, current_turn, ended, winner_id, created_at
 FROM battles";

fn row_to_battle(row: &rusqlite::Row<'_>) -> Result<BattleRow, StoreError> {
    let winner: Option<String> = row_helpers::get(row, 7, "battles", "winner_id")?;
    Ok(BattleRow {
        id: row_helpers::get_id(row, 0, "battles", "id")?,
        player1_id: row_helpers::get_id(row, 1, "battles", "player1_id")?,
        player2_id: row_helpers::get_id(row, 2, "battles", "player2_id")?,
        player1_active_position: row_helpers::get(row, 3, "battles", "player1_active_position")?,
        player2_active_position: row_helpers::get(row, 4, "battles", "player2_active_position")?,
        current_turn: row_helpers::get(row, 5, "battles", "current_turn")?,
        ended: row_helpers::get(row, 6, "battles", "ended")?,
        winner_id: winner
            .map(|raw| row_helpers::parse_id(&raw, "battles", "winner_id"))
            .transpose()?,
        created_at: row_helpers::get(row, 8, "battles", "created_at")?,
    })
}

pub struct BattleRepo {
    db: Database,
}

impl BattleRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(battle_id = %id, player1 = %player1, player2 = %player2))]
    pub fn create(
        &self,
        id: &BattleId,
        player1: &PlayerId,
        player2: &PlayerId,
        player1_active: i64,
        player2_active: i64,
    ) -> Result<BattleRow, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO battles (id, player1_id, player2_id, player1_active_position,
                                      player2_active_position, current_turn, ended, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, 0, ?6)",
                rusqlite::params![
                    id.to_string(),
                    player1.to_string(),
                    player2.to_string(),
                    player1_active,
                    player2_active,
                    now,
                ],
            )?;

            Ok(BattleRow {
                id: *id,
                player1_id: *player1,
                player2_id: *player2,
                player1_active_position: player1_active,
                player2_active_position: player2_active,
                current_turn: 1,
                ended: false,
                winner_id: None,
                created_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(battle_id = %id))]
    pub fn get(&self, id: &BattleId) -> Result<BattleRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_BATTLE} WHERE id = ?1"))?;
            let mut rows = stmt.query([id.to_string()])?;
            match rows.next()? {
                Some(row) => row_to_battle(row),
                None => Err(StoreError::NotFound(format!("battle {id}"))),
            }
        })
    }

    /// The battle `player` is currently fighting, if any.
    #[instrument(skip(self), fields(player_id = %player))]
    pub fn find_active_for_player(&self, player: &PlayerId) -> Result<Option<BattleRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_BATTLE} WHERE (player1_id = ?1 OR player2_id = ?1) AND ended = 0
                 ORDER BY created_at DESC LIMIT 1"
            ))?;
            let mut rows = stmt.query([player.to_string()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_battle(row)?)),
                None => Ok(None),
            }
        })
    }

    #[instrument(skip(self), fields(battle_id = %id, side = %side))]
    pub fn update_active_position(
        &self,
        id: &BattleId,
        side: Side,
        position: i64,
    ) -> Result<(), StoreError> {
        let sql = match side {
            Side::Player1 => "UPDATE battles SET player1_active_position = ?2 WHERE id = ?1",
            Side::Player2 => "UPDATE battles SET player2_active_position = ?2 WHERE id = ?1",
        };
        self.db.with_conn(|conn| {
            let changed = conn.execute(sql, rusqlite::params![id.to_string(), position])?;
            expect_one(changed, id)
        })
    }

    #[instrument(skip(self), fields(battle_id = %id))]
    pub fn advance_turn(&self, id: &BattleId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE battles SET current_turn = current_turn + 1 WHERE id = ?1",
                [id.to_string()],
            )?;
            expect_one(changed, id)
        })
    }

    /// Mark the battle finished. Only the first call records a winner.
    #[instrument(skip(self), fields(battle_id = %id, winner = %winner))]
    pub fn end(&self, id: &BattleId, winner: &PlayerId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE battles SET ended = 1, winner_id = ?2 WHERE id = ?1 AND ended = 0",
                rusqlite::params![id.to_string(), winner.to_string()],
            )?;
            if changed == 0 {
                return Err(StoreError::Conflict(format!("battle {id} already ended or missing")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self), fields(battle_id = %id))]
    pub fn delete(&self, id: &BattleId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM battles WHERE id = ?1", [id.to_string()])?;
            expect_one(changed, id)
        })
    }
}

fn expect_one(changed: usize, id: &BattleId) -> Result<(), StoreError> {
    if changed == 0 {
        Err(StoreError::NotFound(format!("battle {id}")))
    } else {
        Ok(())
    }
}
