// Player-name canonicalization so every source joins on the same key.

use deunicode::deunicode;

use crate::table::{Table, TableError};

/// Column holding the free-text player identifier in every source.
pub const PLAYER_COLUMN: &str = "Player";

/// Canonical form of a player name: ASCII transliteration, lowercase, only
/// alphanumerics and whitespace kept, surrounding whitespace trimmed.
///
/// "Nikola Jokić" and "nikola jokic" both become "nikola jokic";
/// "Jaren Jackson Jr." becomes "jaren jackson jr". Applying it twice gives
/// the same result as applying it once.
pub fn normalize_player_name(raw: &str) -> String {
    deunicode(raw)
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Normalize the `Player` column of a table. Tables without one are
/// returned unchanged; null cells stay null.
pub fn normalize_player_column(table: Table) -> Result<Table, TableError> {
    if !table.has_column(PLAYER_COLUMN) {
        return Ok(table);
    }
    table.map_text(PLAYER_COLUMN, |name| Some(normalize_player_name(name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn strips_accents_and_case() {
        assert_eq!(normalize_player_name("Nikola Jokić"), "nikola jokic");
        assert_eq!(normalize_player_name("Luka Dončić"), "luka doncic");
        assert_eq!(normalize_player_name("Dāvis Bertāns"), "davis bertans");
    }

    #[test]
    fn removes_punctuation() {
        assert_eq!(normalize_player_name("Jaren Jackson Jr."), "jaren jackson jr");
        assert_eq!(normalize_player_name("De'Aaron Fox"), "deaaron fox");
        assert_eq!(normalize_player_name("P.J. Tucker"), "pj tucker");
        assert_eq!(normalize_player_name("Karl-Anthony Towns"), "karlanthony towns");
    }

    #[test]
    fn idempotent() {
        for raw in ["Nikola Jokić", "  O.G. Anunoby ", "Kristaps Porziņģis", "already clean"] {
            let once = normalize_player_name(raw);
            assert_eq!(normalize_player_name(&once), once);
        }
    }

    #[test]
    fn keeps_inner_newline() {
        // wingspan exports pack extra text onto a second line of the cell
        assert_eq!(normalize_player_name("Rudy Gobert\nC"), "rudy gobert\nc");
    }

    #[test]
    fn table_without_player_passes_through() {
        let frame = df!("Team" => ["BOS"], "Season" => ["2023-24"]).unwrap();
        let t = Table::new("team_stats", frame);
        let out = normalize_player_column(t.clone()).unwrap();
        assert!(out.frame().equals_missing(t.frame()));
    }

    #[test]
    fn player_column_normalized_nulls_kept() {
        let frame = df!(
            "Player" => [Some("Bam Adebayo"), None],
            "Season" => ["2023-24", "2023-24"],
        )
        .unwrap();
        let out = normalize_player_column(Table::new("hustle_stats", frame)).unwrap();
        assert_eq!(out.text_at(0, "Player"), Some("bam adebayo".to_string()));
        assert_eq!(out.text_at(1, "Player"), None);
        assert_eq!(out.len(), 2);
    }
}
