// Column reconciliation: disambiguate same-named columns before any merge.
//
// Renames are explicit name-to-name maps keyed by logical source, validated
// against the table's actual schema. A map naming a column the table does not
// have is schema drift and fails the run instead of renaming the wrong thing.

use tracing::debug;

use crate::table::{ColumnMap, Table, TableError};

/// Apply a rename map. An empty map is a no-op.
pub fn rename_columns(table: Table, renames: &ColumnMap) -> Result<Table, TableError> {
    if renames.is_empty() {
        return Ok(table);
    }
    debug!("renaming {} column(s) in {}", renames.len(), table.name());
    table.rename_columns(renames)
}

/// Header case folding used by roster exports (`PLAYER` -> `Player`): first
/// character uppercase, the rest lowercase.
pub fn capitalize(header: &str) -> String {
    let mut chars = header.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Capitalize every header of a table.
pub fn capitalize_headers(table: Table) -> Result<Table, TableError> {
    table.map_column_names(capitalize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn team_row() -> Table {
        let frame = df!(
            "Team" => ["BOS"],
            "Season" => ["2023-24"],
            "FG" => [43.0],
            "FGA" => [89.0],
            "FG.1" => [40.0],
            "FGA.1" => [88.0],
        )
        .unwrap();
        Table::new("team_stats", frame)
    }

    #[test]
    fn opponent_block_renamed_by_name() {
        let map: ColumnMap = [
            ("FG", "tm_FG"),
            ("FGA", "tm_FGA"),
            ("FG.1", "opp_FG"),
            ("FGA.1", "opp_FGA"),
        ]
        .into_iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();
        let t = rename_columns(team_row(), &map).unwrap();
        assert_eq!(
            t.columns(),
            vec!["Team", "Season", "tm_FG", "tm_FGA", "opp_FG", "opp_FGA"]
        );
        assert_eq!(t.number_at(0, "opp_FG"), Some(40.0));
        assert_eq!(t.number_at(0, "tm_FG"), Some(43.0));
    }

    #[test]
    fn schema_drift_fails_fast() {
        let mut map = ColumnMap::new();
        map.insert("3P.1".into(), "opp_3P".into());
        let err = rename_columns(team_row(), &map).unwrap_err();
        match err {
            TableError::MissingColumn { table, column } => {
                assert_eq!(table, "team_stats");
                assert_eq!(column, "3P.1");
            }
            other => panic!("expected MissingColumn, got: {other}"),
        }
    }

    #[test]
    fn rename_onto_existing_column_rejected() {
        let mut map = ColumnMap::new();
        map.insert("FG.1".into(), "FG".into());
        let err = rename_columns(team_row(), &map).unwrap_err();
        assert!(matches!(err, TableError::RenameCollision { .. }));
    }

    #[test]
    fn empty_map_is_noop() {
        let t = rename_columns(team_row(), &ColumnMap::new()).unwrap();
        assert_eq!(t.columns(), team_row().columns());
        assert!(t.frame().equals_missing(team_row().frame()));
    }

    #[test]
    fn capitalize_headers_like_roster_exports() {
        assert_eq!(capitalize("PLAYER"), "Player");
        assert_eq!(capitalize("season"), "Season");
        assert_eq!(capitalize("TeamID"), "Teamid");
        assert_eq!(capitalize(""), "");

        let frame = df!("PLAYER" => ["x"], "HT" => ["6-9"]).unwrap();
        let t = capitalize_headers(Table::new("rosters", frame)).unwrap();
        assert_eq!(t.columns(), vec!["Player", "Ht"]);
    }
}
