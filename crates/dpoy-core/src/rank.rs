// Per-season fractional ranking and the composite average rank.

use polars::prelude::*;
use tracing::debug;

use crate::table::{Table, TableError};

/// Column holding the season label every ranking is grouped by.
pub const SEASON_COLUMN: &str = "Season";

/// Composite score column: mean of a player's metric ranks.
pub const AVERAGE_RANK_COLUMN: &str = "average_rank";

/// Suffix appended to a metric name for its rank column.
pub const RANK_SUFFIX: &str = "_rank";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankDirection {
    HigherIsBetter,
    LowerIsBetter,
}

/// A metric to rank and which way is better.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedMetric {
    pub column: String,
    pub direction: RankDirection,
}

impl RankedMetric {
    pub fn rank_column(&self) -> String {
        format!("{}{}", self.column, RANK_SUFFIX)
    }
}

impl RankDirection {
    fn descending(self) -> bool {
        self == RankDirection::HigherIsBetter
    }
}

/// Average-on-tie rank of `column`; polars leaves nulls unranked.
fn rank_expr(column: &str, direction: RankDirection) -> Expr {
    col(column).cast(DataType::Float64).rank(
        RankOptions {
            method: RankMethod::Average,
            descending: direction.descending(),
        },
        None,
    )
}

/// Fractional ranking: rank 1 is best, tied values share the mean of the
/// ranks they occupy, missing values stay missing and take no rank.
pub fn fractional_rank(
    values: &[Option<f64>],
    direction: RankDirection,
) -> PolarsResult<Vec<Option<f64>>> {
    let ranked = df!("value" => values)?
        .lazy()
        .select([rank_expr("value", direction).cast(DataType::Float64)])
        .collect()?;
    Ok(ranked
        .column("value")?
        .as_materialized_series()
        .f64()?
        .into_iter()
        .collect())
}

/// Add a `<metric>_rank` column for every metric, ranked within each
/// season, then the `average_rank` composite. Rows without a season get no
/// ranks.
pub fn rank_by_season(table: Table, metrics: &[RankedMetric]) -> Result<Table, TableError> {
    table.require_column(SEASON_COLUMN)?;
    for metric in metrics {
        table.require_column(&metric.column)?;
    }

    let ranks: Vec<Expr> = metrics
        .iter()
        .map(|m| {
            when(col(SEASON_COLUMN).is_not_null())
                .then(rank_expr(&m.column, m.direction).over([col(SEASON_COLUMN)]))
                .otherwise(lit(NULL))
                .cast(DataType::Float64)
                .alias(m.rank_column())
        })
        .collect();
    let rank_columns: Vec<Expr> = metrics.iter().map(|m| col(m.rank_column())).collect();
    let average = if rank_columns.is_empty() {
        lit(NULL).cast(DataType::Float64)
    } else {
        match mean_horizontal(rank_columns, true) {
            Ok(expr) => expr,
            Err(source) => {
                return Err(TableError::Frame {
                    table: table.name().to_string(),
                    source,
                })
            }
        }
    };

    debug!("ranking {} metric(s) in {}", metrics.len(), table.name());
    table.lazy_map(|lf| {
        lf.with_columns(ranks)
            .with_column(average.alias(AVERAGE_RANK_COLUMN))
    })
}

/// Final output order: most recent season first, then best composite rank.
/// Missing values sort last in both keys; equal rows keep their order.
pub fn sort_by_season_and_rank(table: Table) -> Result<Table, TableError> {
    table.require_columns(&[SEASON_COLUMN, AVERAGE_RANK_COLUMN])?;
    table.lazy_map(|lf| {
        lf.sort(
            [SEASON_COLUMN, AVERAGE_RANK_COLUMN],
            SortMultipleOptions::default()
                .with_order_descending_multi([true, false])
                .with_nulls_last(true)
                .with_maintain_order(true),
        )
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn higher(col: &str) -> RankedMetric {
        RankedMetric {
            column: col.into(),
            direction: RankDirection::HigherIsBetter,
        }
    }

    fn lower(col: &str) -> RankedMetric {
        RankedMetric {
            column: col.into(),
            direction: RankDirection::LowerIsBetter,
        }
    }

    #[test]
    fn fractional_rank_averages_ties() {
        let ranks = fractional_rank(
            &[Some(3.0), Some(5.0), Some(3.0), Some(1.0)],
            RankDirection::HigherIsBetter,
        )
        .unwrap();
        assert_eq!(ranks, vec![Some(2.5), Some(1.0), Some(2.5), Some(4.0)]);
    }

    #[test]
    fn fractional_rank_lower_is_better() {
        let ranks =
            fractional_rank(&[Some(0.45), Some(0.40), Some(0.50)], RankDirection::LowerIsBetter)
                .unwrap();
        assert_eq!(ranks, vec![Some(2.0), Some(1.0), Some(3.0)]);
    }

    #[test]
    fn fractional_rank_skips_missing() {
        let ranks =
            fractional_rank(&[None, Some(2.0), Some(4.0)], RankDirection::HigherIsBetter).unwrap();
        assert_eq!(ranks, vec![None, Some(2.0), Some(1.0)]);
    }

    #[test]
    fn fractional_rank_all_tied() {
        let ranks = fractional_rank(&[Some(1.0); 3], RankDirection::LowerIsBetter).unwrap();
        assert_eq!(ranks, vec![Some(2.0); 3]);
    }

    fn season_table() -> Table {
        let frame = df!(
            "Player" => ["a", "b", "c", "d", "e"],
            "Season" => ["2022-23", "2023-24", "2023-24", "2023-24", "2023-24"],
            "BLK" => [Some(100.0), Some(150.0), Some(90.0), Some(200.0), None],
            "DFG_PCT" => [40.0, 42.0, 38.0, 36.0, 50.0],
        )
        .unwrap();
        Table::new("merged", frame)
    }

    #[test]
    fn ranks_are_per_season() {
        let out = rank_by_season(season_table(), &[higher("BLK"), lower("DFG_PCT")]).unwrap();
        // only player in 2022-23
        assert_eq!(out.number_at(0, "BLK_rank"), Some(1.0));
        assert_eq!(out.number_at(0, "DFG_PCT_rank"), Some(1.0));
        // season max gets rank 1
        assert_eq!(out.number_at(3, "BLK_rank"), Some(1.0));
        assert_eq!(out.number_at(1, "BLK_rank"), Some(2.0));
        assert_eq!(out.number_at(2, "BLK_rank"), Some(3.0));
        assert_eq!(out.number_at(4, "BLK_rank"), None);
    }

    #[test]
    fn average_rank_is_mean_of_present_ranks() {
        let out = rank_by_season(season_table(), &[higher("BLK"), lower("DFG_PCT")]).unwrap();
        // d leads both metrics
        assert_eq!(out.number_at(3, "average_rank"), Some(1.0));
        // b: BLK 2, DFG_PCT 3
        assert_eq!(out.number_at(1, "average_rank"), Some(2.5));
        // e: no BLK, DFG_PCT 4
        assert_eq!(out.number_at(4, "average_rank"), Some(4.0));
    }

    #[test]
    fn rows_without_season_are_unranked() {
        let frame = df!(
            "Player" => ["a", "b"],
            "Season" => [Some("2023-24"), None],
            "BLK" => [1.0, 2.0],
        )
        .unwrap();
        let out = rank_by_season(Table::new("merged", frame), &[higher("BLK")]).unwrap();
        assert_eq!(out.number_at(0, "BLK_rank"), Some(1.0));
        assert_eq!(out.number_at(1, "BLK_rank"), None);
        assert_eq!(out.number_at(1, "average_rank"), None);
    }

    #[test]
    fn missing_metric_column_is_schema_error() {
        let err = rank_by_season(season_table(), &[higher("Deflections")]).unwrap_err();
        match err {
            TableError::MissingColumn { table, column } => {
                assert_eq!(table, "merged");
                assert_eq!(column, "Deflections");
            }
            other => panic!("expected MissingColumn, got: {other}"),
        }
    }

    #[test]
    fn final_sort_season_desc_then_rank_asc() {
        let ranked = rank_by_season(season_table(), &[higher("BLK"), lower("DFG_PCT")]).unwrap();
        let out = sort_by_season_and_rank(ranked).unwrap();
        let players: Vec<String> = out
            .texts("Player")
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        // 2023-24: d 1.0, b 2.5, c (3 + 2)/2 = 2.5, e 4.0; ties keep input order
        assert_eq!(players, vec!["d", "b", "c", "e", "a"]);
    }

    #[test]
    fn null_average_sorts_last_within_season() {
        let frame = df!(
            "Player" => ["x", "y", "z"],
            "Season" => ["2023-24", "2023-24", "2022-23"],
            "average_rank" => [None, Some(2.0), Some(1.0)],
        )
        .unwrap();
        let out = sort_by_season_and_rank(Table::new("merged", frame)).unwrap();
        assert_eq!(out.text_at(0, "Player"), Some("y".to_string()));
        assert_eq!(out.text_at(1, "Player"), Some("x".to_string()));
        assert_eq!(out.text_at(2, "Player"), Some("z".to_string()));
    }
}
