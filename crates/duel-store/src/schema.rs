/// SQL DDL for the duel database.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS species (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    max_hp INTEGER NOT NULL CHECK (max_hp > 0)
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_team (
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    species_id INTEGER NOT NULL REFERENCES species(id),
    current_hp INTEGER NOT NULL,
    is_fainted INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (user_id, position)
);

CREATE TABLE IF NOT EXISTS battles (
    id TEXT PRIMARY KEY,
    player1_id TEXT NOT NULL REFERENCES users(id),
    player2_id TEXT NOT NULL REFERENCES users(id),
    player1_active_position INTEGER NOT NULL,
    player2_active_position INTEGER NOT NULL,
    current_turn INTEGER NOT NULL DEFAULT 1,
    ended INTEGER NOT NULL DEFAULT 0,
    winner_id TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_battles_player1 ON battles(player1_id);
CREATE INDEX IF NOT EXISTS idx_battles_player2 ON battles(player2_id);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

/// Species catalogue. Ids are what clients send in their roster.
pub const SEED_SPECIES: &str = r#"
INSERT OR IGNORE INTO species (id, name, max_hp) VALUES
    (1, 'Bulbasaur', 45),
    (2, 'Ivysaur', 60),
    (3, 'Venusaur', 80),
    (4, 'Charmander', 39),
    (5, 'Charmeleon', 58),
    (6, 'Charizard', 78),
    (7, 'Squirtle', 44),
    (8, 'Wartortle', 59),
    (9, 'Blastoise', 79),
    (25, 'Pikachu', 35);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
