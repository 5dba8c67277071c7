// Two-table joins on composite keys.
//
// The right-hand table must hold at most one row per key. That is checked
// before any row is produced: a duplicate key would fan out left rows and
// silently corrupt every downstream row count.

use std::fmt;

use polars::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::table::{Table, TableError};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Keep every left row; unmatched right columns are null.
    Left,
    /// Keep only left rows with a right-hand match.
    Inner,
}

impl JoinKind {
    fn join_type(self) -> JoinType {
        match self {
            JoinKind::Left => JoinType::Left,
            JoinKind::Inner => JoinType::Inner,
        }
    }
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinKind::Left => f.write_str("left"),
            JoinKind::Inner => f.write_str("inner"),
        }
    }
}

/// Key columns for the joins the pipeline performs.
pub const PLAYER_SEASON: &[&str] = &["Player", "Season"];
pub const TEAM_SEASON: &[&str] = &["Team", "Season"];
pub const PLAYER_ONLY: &[&str] = &["Player"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinSpec {
    pub keys: &'static [&'static str],
    pub kind: JoinKind,
}

impl JoinSpec {
    pub const fn left(keys: &'static [&'static str]) -> JoinSpec {
        JoinSpec {
            keys,
            kind: JoinKind::Left,
        }
    }

    pub const fn inner(keys: &'static [&'static str]) -> JoinSpec {
        JoinSpec {
            keys,
            kind: JoinKind::Inner,
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("table `{table}` has more than one row for key ({})", .key.join(", "))]
    DuplicateKey { table: String, key: Vec<String> },

    #[error(
        "column `{column}` exists in both `{left}` and `{right}`; rename one side before merging"
    )]
    ColumnCollision {
        left: String,
        right: String,
        column: String,
    },

    #[error(transparent)]
    Schema(#[from] TableError),
}

// ---------------------------------------------------------------------------
// Join
// ---------------------------------------------------------------------------

const ROW_INDEX: &str = "__row_index";
const ROW_COUNT: &str = "__rows";

/// True where every key cell is present.
fn keys_present(keys: &[&str]) -> Expr {
    keys.iter()
        .map(|k| col(*k).is_not_null())
        .reduce(|a, b| a.and(b))
        .unwrap_or_else(|| lit(true))
}

fn key_exprs(keys: &[&str]) -> Vec<Expr> {
    keys.iter().map(|k| col(*k)).collect()
}

/// Check that `table` has at most one row per key. Rows with a null key
/// cell are ignored since they can never match.
pub fn ensure_unique_keys(table: &Table, keys: &[&str]) -> Result<(), JoinError> {
    table.require_columns(keys)?;
    let frame_error = |source| TableError::Frame {
        table: table.name().to_string(),
        source,
    };

    let repeated = table
        .frame()
        .clone()
        .lazy()
        .filter(keys_present(keys))
        .group_by_stable(key_exprs(keys))
        .agg([len().alias(ROW_COUNT)])
        .filter(col(ROW_COUNT).gt(lit(1)))
        .limit(1)
        .collect()
        .map_err(frame_error)?;
    if repeated.height() == 0 {
        return Ok(());
    }

    let key = keys
        .iter()
        .map(|k| {
            let value = repeated.column(k)?.get(0)?;
            Ok(value.str_value().into_owned())
        })
        .collect::<PolarsResult<Vec<String>>>()
        .map_err(frame_error)?;
    Err(JoinError::DuplicateKey {
        table: table.name().to_string(),
        key,
    })
}

/// Join `right` onto `left`. The result keeps `left`'s name, row order and
/// columns, followed by `right`'s non-key columns.
pub fn join(left: Table, right: &Table, spec: JoinSpec) -> Result<Table, JoinError> {
    left.require_columns(spec.keys)?;
    right.require_columns(spec.keys)?;
    ensure_unique_keys(right, spec.keys)?;

    for column in right.columns() {
        if !spec.keys.contains(&column.as_str()) && left.has_column(&column) {
            return Err(JoinError::ColumnCollision {
                left: left.name().to_string(),
                right: right.name().to_string(),
                column,
            });
        }
    }

    let left_len = left.len();
    let right_lf = right
        .frame()
        .clone()
        .lazy()
        .filter(keys_present(spec.keys));
    let keys = key_exprs(spec.keys);
    let args = JoinArgs {
        validation: JoinValidation::ManyToOne,
        ..JoinArgs::new(spec.kind.join_type())
    };

    let out = left.lazy_map(|lf| {
        lf.with_row_index(ROW_INDEX, None)
            .join(right_lf, keys.clone(), keys, args)
            .sort([ROW_INDEX], SortMultipleOptions::default())
            .drop([ROW_INDEX])
    })?;

    debug!(
        "{} join {} <- {} on ({}): {} rows in, {} kept",
        spec.kind,
        out.name(),
        right.name(),
        spec.keys.join(", "),
        left_len,
        out.len()
    );
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
