// Logical source datasets and loading them from CSV.
//
// Each source is identified by a `SourceId`; the file behind it comes from
// configuration. Loaded tables are named after their source so every later
// error names the dataset it came from.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::table::{Table, TableError};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    /// NBA.com defense dashboard: the base table every merge builds on.
    DefenseDashboard,
    BoxOuts,
    #[serde(rename = "defense_2pt")]
    Defense2pt,
    #[serde(rename = "defense_3pt")]
    Defense3pt,
    HustleStats,
    /// Basketball-Reference award voting history.
    DpoyVoting,
    TeamStats,
    TeamAdvanced,
    PlayerStats,
    PlayerAdvanced,
    /// Draft combine anthropometrics.
    Combine,
    Rosters,
    Wingspans,
}

impl SourceId {
    pub const ALL: [SourceId; 13] = [
        SourceId::DefenseDashboard,
        SourceId::BoxOuts,
        SourceId::Defense2pt,
        SourceId::Defense3pt,
        SourceId::HustleStats,
        SourceId::DpoyVoting,
        SourceId::TeamStats,
        SourceId::TeamAdvanced,
        SourceId::PlayerStats,
        SourceId::PlayerAdvanced,
        SourceId::Combine,
        SourceId::Rosters,
        SourceId::Wingspans,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::DefenseDashboard => "defense_dashboard",
            SourceId::BoxOuts => "box_outs",
            SourceId::Defense2pt => "defense_2pt",
            SourceId::Defense3pt => "defense_3pt",
            SourceId::HustleStats => "hustle_stats",
            SourceId::DpoyVoting => "dpoy_voting",
            SourceId::TeamStats => "team_stats",
            SourceId::TeamAdvanced => "team_advanced",
            SourceId::PlayerStats => "player_stats",
            SourceId::PlayerAdvanced => "player_advanced",
            SourceId::Combine => "combine",
            SourceId::Rosters => "rosters",
            SourceId::Wingspans => "wingspans",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The full set of input tables, one per source.
#[derive(Debug, Clone, Default)]
pub struct SourceTables {
    tables: BTreeMap<SourceId, Table>,
}

impl SourceTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a source. The table is renamed after the source.
    pub fn insert(&mut self, id: SourceId, table: Table) {
        self.tables.insert(id, table.with_name(id.as_str()));
    }

    pub fn get(&self, id: SourceId) -> Option<&Table> {
        self.tables.get(&id)
    }

    pub fn take(&mut self, id: SourceId) -> Option<Table> {
        self.tables.remove(&id)
    }

    /// Sources expected by the pipeline but not present.
    pub fn missing(&self) -> Vec<SourceId> {
        SourceId::ALL
            .into_iter()
            .filter(|id| !self.tables.contains_key(id))
            .collect()
    }

    /// Rebuild every table through `f`, stopping at the first error.
    pub fn try_map<E>(
        self,
        mut f: impl FnMut(SourceId, Table) -> Result<Table, E>,
    ) -> Result<SourceTables, E> {
        let mut out = SourceTables::new();
        for (id, table) in self.tables {
            out.insert(id, f(id, table)?);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no path configured for source `{0}`")]
    NoPath(SourceId),

    #[error("failed to load source `{id}`: {error}")]
    Load { id: SourceId, error: TableError },

    #[error("source `{0}` produced zero rows")]
    Empty(SourceId),
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load one source from a CSV file.
pub fn load_source(id: SourceId, path: &Path) -> Result<Table, SourceError> {
    let table = Table::from_csv_path(id.as_str(), path)
        .map_err(|error| SourceError::Load { id, error })?;
    if table.is_empty() {
        warn!("{} ({}) has no rows", id, path.display());
    }
    Ok(table)
}

/// Load every source named in `paths`. The base table must not be empty;
/// nothing downstream can recover from that.
pub fn load_all(paths: &BTreeMap<SourceId, String>) -> Result<SourceTables, SourceError> {
    let mut tables = SourceTables::new();
    for id in SourceId::ALL {
        let path = paths.get(&id).ok_or(SourceError::NoPath(id))?;
        let table = load_source(id, Path::new(path))?;
        info!("Loaded {}: {} rows x {} columns", id, table.len(), table.width());
        tables.insert(id, table);
    }
    if tables
        .get(SourceId::DefenseDashboard)
        .is_some_and(Table::is_empty)
    {
        return Err(SourceError::Empty(SourceId::DefenseDashboard));
    }
    Ok(tables)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
