// Arithmetic derivations: shooting percentages, season totals from per-game
// rates, and length/height text converted to inches.
//
// Unparseable text never aborts a run: the cell becomes null and a warning
// names the value.

use once_cell::sync::Lazy;
use polars::prelude::*;
use regex::Regex;
use tracing::warn;

use crate::table::{ColumnMap, Table, TableError};

// ---------------------------------------------------------------------------
// Scalar conversions
// ---------------------------------------------------------------------------

/// `6' 9.5"` (wingspan sites) or `6' 9.5''` (combine exports). Matched at
/// the start of the text only.
static FEET_INCHES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(\d+)' *(\d+(?:\.\d*)?)(?:''|")"#).expect("feet/inches pattern is valid")
});

/// `6-9` roster heights.
static HYPHEN_HEIGHT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)-(\d+)$").expect("hyphen height pattern is valid"));

/// `makes / attempts * 100`. `None` when either side is missing or there
/// were no attempts.
pub fn shooting_pct(makes: Option<f64>, attempts: Option<f64>) -> Option<f64> {
    let (makes, attempts) = (makes?, attempts?);
    if attempts == 0.0 {
        return None;
    }
    Some(makes / attempts * 100.0)
}

/// Season total reconstructed from a per-game rate.
pub fn per_game_total(rate: Option<f64>, games: Option<f64>) -> Option<f64> {
    Some(rate? * games?)
}

/// Parse feet/inches text into total inches.
pub fn feet_inches_to_inches(text: &str) -> Option<f64> {
    let caps = FEET_INCHES.captures(text.trim())?;
    let feet: f64 = caps[1].parse().ok()?;
    let inches: f64 = caps[2].parse().ok()?;
    Some(feet * 12.0 + inches)
}

/// Parse a roster height like `6-9` into inches.
pub fn hyphen_height_to_inches(text: &str) -> Option<f64> {
    let caps = HYPHEN_HEIGHT.captures(text.trim())?;
    let feet: f64 = caps[1].parse().ok()?;
    let inches: f64 = caps[2].parse().ok()?;
    Some(feet * 12.0 + inches)
}

/// `12.5%` -> 12.5. Plain numbers pass through.
pub fn percent_text_to_number(text: &str) -> Option<f64> {
    text.trim()
        .trim_end_matches('%')
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
}

/// `2023` -> `2023-24`.
pub fn season_label(start_year: i64) -> String {
    let end = (start_year + 1).rem_euclid(100);
    format!("{start_year}-{end:02}")
}

// ---------------------------------------------------------------------------
// Column-level derivations
// ---------------------------------------------------------------------------

fn number(column: &str) -> Expr {
    col(column).cast(DataType::Float64)
}

fn is_numeric(table: &Table, column: &str) -> Result<bool, TableError> {
    let dtype = table.require_column(column)?.dtype();
    Ok(dtype.is_integer() || dtype.is_float())
}

/// Add `expr` once every input column is known to exist.
fn with_derived(table: Table, inputs: &[&str], expr: Expr) -> Result<Table, TableError> {
    table.require_columns(inputs)?;
    table.lazy_map(|lf| lf.with_column(expr))
}

/// Add `target` = `makes / attempts * 100`; null where there were no
/// attempts.
pub fn add_pct_column(
    table: Table,
    target: &str,
    makes: &str,
    attempts: &str,
) -> Result<Table, TableError> {
    let pct = when(number(attempts).neq(lit(0.0)))
        .then(number(makes) / number(attempts) * lit(100.0))
        .otherwise(lit(NULL))
        .alias(target);
    with_derived(table, &[makes, attempts], pct)
}

/// Add `target` = `rate * games`.
pub fn add_total_column(
    table: Table,
    target: &str,
    rate: &str,
    games: &str,
) -> Result<Table, TableError> {
    let total = (number(rate) * number(games)).alias(target);
    with_derived(table, &[rate, games], total)
}

/// Multiply a numeric column by `factor` (fractions -> percentages).
pub fn scale_column(table: Table, column: &str, factor: f64) -> Result<Table, TableError> {
    let scaled = (number(column) * lit(factor)).alias(column);
    with_derived(table, &[column], scaled)
}

/// Replace nulls with zero in each listed column.
pub fn zero_fill(table: Table, columns: &[String]) -> Result<Table, TableError> {
    let names: Vec<&str> = columns.iter().map(String::as_str).collect();
    table.require_columns(&names)?;
    let filled: Vec<Expr> = names
        .iter()
        .map(|c| number(c).fill_null(lit(0.0)).alias(*c))
        .collect();
    table.lazy_map(|lf| lf.with_columns(filled))
}

/// Write `target` with the inches value of a length column, parsed by
/// `parse`. Cells that do not parse become null with a warning. A numeric
/// column, or a bare number in text, is taken as already being inches.
pub fn convert_length_column(
    table: Table,
    source: &str,
    target: &str,
    parse: fn(&str) -> Option<f64>,
) -> Result<Table, TableError> {
    let values: Vec<Option<f64>> = if is_numeric(&table, source)? {
        table.numbers(source)?
    } else {
        table
            .texts(source)?
            .into_iter()
            .map(|cell| {
                let text = cell?;
                let inches = parse(&text).or_else(|| text.trim().parse::<f64>().ok());
                if inches.is_none() {
                    warn!("{}: could not parse {} value '{}'", table.name(), source, text);
                }
                inches
            })
            .collect()
    };
    table.set_column(target, Series::new(target.into(), values))
}

/// Strip `%` from a text column and make it numeric; unparseable cells
/// become null with a warning.
pub fn percent_column(table: Table, column: &str) -> Result<Table, TableError> {
    if is_numeric(&table, column)? {
        return Ok(table);
    }
    let values: Vec<Option<f64>> = table
        .texts(column)?
        .into_iter()
        .map(|cell| {
            let text = cell?;
            let n = percent_text_to_number(&text);
            if n.is_none() {
                warn!("{}: could not parse {} value '{}'", table.name(), column, text);
            }
            n
        })
        .collect();
    table.set_column(column, Series::new(column.into(), values))
}

/// Turn a start-year season column (`2023`) into a season label (`2023-24`).
/// Text that is already a label is left alone.
pub fn season_label_column(table: Table, column: &str) -> Result<Table, TableError> {
    let name = table.name().to_string();
    table.map_text(column, |text| match text.trim().parse::<f64>() {
        Ok(year) if year.fract() == 0.0 => Some(season_label(year as i64)),
        Ok(year) => {
            warn!("{}: season start year {} is not a whole number", name, year);
            None
        }
        Err(_) => Some(text.to_string()),
    })
}

/// Replace whole-cell text values in one column.
pub fn replace_values(
    table: Table,
    column: &str,
    replacements: &ColumnMap,
) -> Result<Table, TableError> {
    if replacements.is_empty() {
        return Ok(table);
    }
    table.map_text(column, |text| {
        Some(replacements.get(text).cloned().unwrap_or_else(|| text.to_string()))
    })
}

/// Keep only the first line of each text cell, trimmed.
pub fn first_line_column(table: Table, column: &str) -> Result<Table, TableError> {
    table.map_text(column, |text| {
        Some(text.lines().next().unwrap_or_default().trim().to_string())
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
