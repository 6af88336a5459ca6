use std::str::FromStr;

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a text id column (`PlayerId`, `BattleId`).
pub fn parse_id<T: FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid id: {raw}"),
    })
}

/// Read a text column and parse it as an id.
pub fn get_id<T: FromStr>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    let raw: String = get(row, idx, table, column)?;
    parse_id(&raw, table, column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use duel_core::PlayerId;

    #[test]
    fn parse_id_success() {
        let id = PlayerId::new();
        let parsed: PlayerId = parse_id(&id.to_string(), "users", "id").unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_id_failure() {
        let result: Result<PlayerId, _> = parse_id("nope", "users", "id");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "users", column: "id", .. })
        ));
    }
}
