use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::instrument;

use duel_core::{PlayerId, RosterSlot};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug)]
pub struct UserRow {
    pub id: PlayerId,
    pub username: String,
    pub created_at: String,
}

pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a user and its roster in one transaction. Positions are assigned
    /// 1.. in the order given; every unit starts at its species' max HP.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn create_with_roster(
        &self,
        id: &PlayerId,
        username: &str,
        species_ids: &[i64],
    ) -> Result<UserRow, StoreError> {
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            tx.execute(
                "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![id.to_string(), username, now],
            )?;

            for (idx, species_id) in species_ids.iter().enumerate() {
                let max_hp: Option<i64> = tx
                    .query_row(
                        "SELECT max_hp FROM species WHERE id = ?1",
                        [species_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(max_hp) = max_hp else {
                    // Dropping `tx` rolls back the user row as well.
                    return Err(StoreError::NotFound(format!("species {species_id}")));
                };

                tx.execute(
                    "INSERT INTO user_team (user_id, position, species_id, current_hp, is_fainted)
                     VALUES (?1, ?2, ?3, ?4, 0)",
                    rusqlite::params![id.to_string(), idx as i64 + 1, species_id, max_hp],
                )?;
            }

            tx.commit()?;

            Ok(UserRow {
                id: *id,
                username: username.to_string(),
                created_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: &PlayerId) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, username, created_at FROM users WHERE id = ?1")?;
            let mut rows = stmt.query([id.to_string()])?;
            match rows.next()? {
                Some(row) => Ok(UserRow {
                    id: row_helpers::get_id(row, 0, "users", "id")?,
                    username: row_helpers::get(row, 1, "users", "username")?,
                    created_at: row_helpers::get(row, 2, "users", "created_at")?,
                }),
                None => Err(StoreError::NotFound(format!("user {id}"))),
            }
        })
    }

    /// Delete a user; the roster goes with it.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn delete(&self, id: &PlayerId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM users WHERE id = ?1", [id.to_string()])?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("user {id}")));
            }
            Ok(())
        })
    }

    /// Roster ordered by position. An empty roster is reported as not found.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn roster(&self, id: &PlayerId) -> Result<Vec<RosterSlot>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.position, t.species_id, t.current_hp, s.max_hp, t.is_fainted
                 FROM user_team t JOIN species s ON s.id = t.species_id
                 WHERE t.user_id = ?1
                 ORDER BY t.position",
            )?;
            let mut rows = stmt.query([id.to_string()])?;
            let mut roster = Vec::new();
            while let Some(row) = rows.next()? {
                roster.push(RosterSlot {
                    position: row_helpers::get(row, 0, "user_team", "position")?,
                    species_id: row_helpers::get(row, 1, "user_team", "species_id")?,
                    current_hp: row_helpers::get(row, 2, "user_team", "current_hp")?,
                    max_hp: row_helpers::get(row, 3, "species", "max_hp")?,
                    fainted: row_helpers::get(row, 4, "user_team", "is_fainted")?,
                });
            }
            if roster.is_empty() {
                return Err(StoreError::NotFound(format!("roster for player {id}")));
            }
            Ok(roster)
        })
    }

    /// Set a slot's HP, clamped to `[0, max_hp]`. The fainted flag follows HP == 0.
    /// Returns the stored HP.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn update_slot_hp(&self, id: &PlayerId, position: i64, hp: i64) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            let max_hp: Option<i64> = conn
                .query_row(
                    "SELECT s.max_hp FROM user_team t JOIN species s ON s.id = t.species_id
                     WHERE t.user_id = ?1 AND t.position = ?2",
                    rusqlite::params![id.to_string(), position],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(max_hp) = max_hp else {
                return Err(StoreError::NotFound(format!(
                    "slot {position} for player {id}"
                )));
            };

            let clamped = hp.clamp(0, max_hp);
            conn.execute(
                "UPDATE user_team SET current_hp = ?3, is_fainted = ?4
                 WHERE user_id = ?1 AND position = ?2",
                rusqlite::params![id.to_string(), position, clamped, clamped == 0],
            )?;
            Ok(clamped)
        })
    }

    /// Restore every slot to full HP and clear fainted flags.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn reset_roster(&self, id: &PlayerId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE user_team
                 SET current_hp = (SELECT max_hp FROM species WHERE species.id = user_team.species_id),
                     is_fainted = 0
                 WHERE user_id = ?1",
                [id.to_string()],
            )?;
            Ok(())
        })
    }
}
