// Named polars frames: the unit every pipeline stage passes along.
//
// A `Table` is a `DataFrame` plus the logical name of the dataset it came
// from. Stages take a `Table` by value and return a new one; the name is
// carried into every error so a failure always points at the dataset.
//
// Numeric columns are normalized to Float64 on load so derivations and ranks
// never have to care whether an export wrote `82` or `82.0`.

use std::collections::{BTreeMap, HashSet};
use std::io::{Cursor, Read, Write};
use std::path::Path;

use once_cell::sync::Lazy;
use polars::prelude::*;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

/// Old column name -> new column name (also used for value replacements).
pub type ColumnMap = BTreeMap<String, String>;

/// Suffix polars gives the n-th repeat of a CSV header (`FG_duplicated_0`).
static DUPLICATED_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.*)_duplicated_(\d+)$").expect("duplicated header pattern is valid")
});

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TableError {
    #[error("table `{table}` has no column `{column}`")]
    MissingColumn { table: String, column: String },

    #[error("table `{table}` already has a column named `{column}`")]
    DuplicateColumn { table: String, column: String },

    #[error("renaming in table `{table}` would map more than one column to `{column}`")]
    RenameCollision { table: String, column: String },

    #[error("polars error in table `{table}`: {source}")]
    Frame { table: String, source: PolarsError },

    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    frame: DataFrame,
}

impl Table {
    pub fn new(name: impl Into<String>, frame: DataFrame) -> Table {
        Table {
            name: name.into(),
            frame,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Table {
        self.name = name.into();
        self
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    pub fn width(&self) -> usize {
        self.frame.width()
    }

    pub fn columns(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .into_iter()
            .map(|c| c.to_string())
            .collect()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.frame.get_column_index(column).is_some()
    }

    fn missing(&self, column: &str) -> TableError {
        TableError::MissingColumn {
            table: self.name.clone(),
            column: column.to_string(),
        }
    }

    fn frame_error(&self, source: PolarsError) -> TableError {
        TableError::Frame {
            table: self.name.clone(),
            source,
        }
    }

    /// The named column, or `MissingColumn` naming this table.
    pub fn require_column(&self, column: &str) -> Result<&Series, TableError> {
        self.frame
            .column(column)
            .map(Column::as_materialized_series)
            .map_err(|_| self.missing(column))
    }

    pub fn require_columns(&self, columns: &[&str]) -> Result<(), TableError> {
        columns
            .iter()
            .try_for_each(|c| self.require_column(c).map(|_| ()))
    }

    /// Column values as numbers; cells that are not numeric come back `None`.
    pub fn numbers(&self, column: &str) -> Result<Vec<Option<f64>>, TableError> {
        let cast = self
            .require_column(column)?
            .cast(&DataType::Float64)
            .map_err(|e| self.frame_error(e))?;
        let values = cast.f64().map_err(|e| self.frame_error(e))?;
        Ok(values.into_iter().collect())
    }

    /// Column values as text.
    pub fn texts(&self, column: &str) -> Result<Vec<Option<String>>, TableError> {
        let cast = self
            .require_column(column)?
            .cast(&DataType::String)
            .map_err(|e| self.frame_error(e))?;
        let values = cast.str().map_err(|e| self.frame_error(e))?;
        Ok(values
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect())
    }

    /// A single numeric cell; `None` for null, non-numeric or out of range.
    pub fn number_at(&self, row: usize, column: &str) -> Option<f64> {
        self.numbers(column).ok()?.get(row).copied().flatten()
    }

    /// A single cell as text; `None` for null or out of range.
    pub fn text_at(&self, row: usize, column: &str) -> Option<String> {
        self.texts(column).ok()?.get(row).cloned().flatten()
    }

    // -- column operations --

    /// Keep only `columns`, in that order.
    pub fn select(self, columns: &[&str]) -> Result<Table, TableError> {
        self.require_columns(columns)?;
        let frame = self
            .frame
            .select(columns.iter().copied())
            .map_err(|e| self.frame_error(e))?;
        Ok(Table { frame, ..self })
    }

    /// Remove `columns`; every one of them must exist.
    pub fn drop_columns(self, columns: &[&str]) -> Result<Table, TableError> {
        self.require_columns(columns)?;
        let keep: Vec<String> = self
            .columns()
            .into_iter()
            .filter(|c| !columns.contains(&c.as_str()))
            .collect();
        let frame = self.frame.select(keep).map_err(|e| self.frame_error(e))?;
        Ok(Table { frame, ..self })
    }

    /// Rename columns by name. The whole map is validated against the
    /// current schema before anything changes: every source column must
    /// exist, and no resulting name may appear twice.
    pub fn rename_columns(self, renames: &ColumnMap) -> Result<Table, TableError> {
        for from in renames.keys() {
            self.require_column(from)?;
        }
        let renamed: Vec<String> = self
            .columns()
            .into_iter()
            .map(|c| renames.get(&c).cloned().unwrap_or(c))
            .collect();
        self.set_names(renamed)
    }

    /// Rename every column through `f` (e.g. header case folding).
    pub fn map_column_names(self, f: impl Fn(&str) -> String) -> Result<Table, TableError> {
        let renamed: Vec<String> = self.columns().iter().map(|c| f(c)).collect();
        self.set_names(renamed)
    }

    fn set_names(mut self, names: Vec<String>) -> Result<Table, TableError> {
        let mut seen = HashSet::new();
        if let Some(dup) = names.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(TableError::RenameCollision {
                table: self.name,
                column: dup.clone(),
            });
        }
        if let Err(e) = self.frame.set_column_names(names) {
            return Err(self.frame_error(e));
        }
        Ok(self)
    }

    /// Replace a column's values, or append the column if it is new.
    pub fn set_column(mut self, column: &str, values: Series) -> Result<Table, TableError> {
        if values.len() != self.len() {
            return Err(self.frame_error(PolarsError::ShapeMismatch(
                format!(
                    "column `{column}` has {} values for {} rows",
                    values.len(),
                    self.len()
                )
                .into(),
            )));
        }
        if let Err(e) = self.frame.with_column(values.with_name(column.into())) {
            return Err(self.frame_error(e));
        }
        Ok(self)
    }

    /// Rewrite the non-null text cells of an existing column through `f`.
    /// Returning `None` nulls the cell.
    pub fn map_text(
        self,
        column: &str,
        mut f: impl FnMut(&str) -> Option<String>,
    ) -> Result<Table, TableError> {
        let values: Vec<Option<String>> = self
            .texts(column)?
            .into_iter()
            .map(|v| v.and_then(|s| f(&s)))
            .collect();
        self.set_column(column, Series::new(column.into(), values))
    }

    /// Run a lazy query over the frame and collect it back under this name.
    pub fn lazy_map(self, f: impl FnOnce(LazyFrame) -> LazyFrame) -> Result<Table, TableError> {
        let Table { name, frame } = self;
        match f(frame.lazy()).collect() {
            Ok(frame) => Ok(Table { name, frame }),
            Err(source) => Err(TableError::Frame {
                table: name,
                source,
            }),
        }
    }

    // -- CSV --

    /// Read a table from CSV. A repeated header is disambiguated as
    /// `FG.1`, `FG.2`, ... Integer columns become Float64 and NaN becomes
    /// null. Overlong rows are truncated to the header width.
    pub fn from_csv_reader<R: Read>(name: &str, mut rdr: R) -> Result<Table, TableError> {
        let mut bytes = Vec::new();
        rdr.read_to_end(&mut bytes).map_err(|e| TableError::Io {
            path: name.to_string(),
            source: e,
        })?;

        let frame = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(None)
            .with_parse_options(CsvParseOptions::default().with_truncate_ragged_lines(true))
            .into_reader_with_file_handle(Cursor::new(bytes))
            .finish()
            .map_err(|source| TableError::Frame {
                table: name.to_string(),
                source,
            })?;

        let table = Table::new(name, frame).map_column_names(undo_duplicate_suffix)?;
        let numeric: Vec<Expr> = table
            .frame
            .get_columns()
            .iter()
            .filter(|c| c.dtype().is_integer() || c.dtype().is_float())
            .map(|c| {
                col(c.name().clone())
                    .cast(DataType::Float64)
                    .fill_nan(lit(NULL))
            })
            .collect();
        let table = table.lazy_map(|lf| lf.with_columns(numeric))?;
        debug!(
            "read {}: {} rows x {} columns",
            name,
            table.len(),
            table.width()
        );
        Ok(table)
    }

    /// Read a table from a CSV file on disk.
    pub fn from_csv_path(name: &str, path: &Path) -> Result<Table, TableError> {
        let file = std::fs::File::open(path).map_err(|e| TableError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Table::from_csv_reader(name, file)
    }

    /// Write the table as CSV with a header row. Nulls are written empty.
    pub fn write_csv<W: Write>(&self, mut w: W) -> Result<(), TableError> {
        let mut frame = self.frame.clone();
        CsvWriter::new(&mut w)
            .include_header(true)
            .finish(&mut frame)
            .map_err(|e| self.frame_error(e))
    }

    /// Write the table to a CSV file, creating parent directories.
    pub fn write_csv_path(&self, path: &Path) -> Result<(), TableError> {
        let io_err = |e: std::io::Error| TableError::Io {
            path: path.display().to_string(),
            source: e,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = std::fs::File::create(path).map_err(io_err)?;
        self.write_csv(file)
    }
}

/// `FG_duplicated_0` -> `FG.1`, the spreadsheet convention the rename maps
/// are written against.
fn undo_duplicate_suffix(header: &str) -> String {
    match DUPLICATED_HEADER.captures(header) {
        Some(caps) => {
            let n: usize = caps[2].parse().unwrap_or(0);
            format!("{}.{}", &caps[1], n + 1)
        }
        None => header.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
