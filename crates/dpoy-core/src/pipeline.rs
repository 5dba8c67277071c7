// Pipeline driver: the fixed sequence of stages that turns the source tables
// into the ranked player-season table.
//
// Stage order:
// 1. inputs            every source present
// 2. normalize         header canonicalization, Player keys normalized
// 3. reconcile         per-source column renames (opp_/tm_, 2pt/3pt)
// 4. prepare_sources   per-source derivations and drops
// 5. merge_defense     box outs, 2pt/3pt, hustle, voting onto the dashboard
// 6. per_game_totals   BLK/STL -> BPG/SPG, season totals rebuilt
// 7. rank              per-season metric ranks and average_rank
// 8. merge_team        team and opponent context by (Team, Season)
// 9. merge_player      advanced player stats
// 10. fill_votes       award-voting nulls become zero
// 11. merge_roster     inner joins on roster size and box score totals
// 12. merge_biometrics combine measurements and wingspans by Player
// 13. finalize         one sort, one row per (Player, Season)
//
// Every stage takes the previous table by value and returns a new one, so a
// stage can be run and tested on its own.

use std::fmt;

use thiserror::Error;
use tracing::info;

use crate::config::{Config, PerGameTotal, RenameTables};
use crate::derive;
use crate::join::{self, JoinError, JoinSpec, PLAYER_ONLY, PLAYER_SEASON, TEAM_SEASON};
use crate::normalize::normalize_player_column;
use crate::rank::{self, RankedMetric};
use crate::reconcile;
use crate::sources::{SourceId, SourceTables};
use crate::table::{ColumnMap, Table, TableError};

// ---------------------------------------------------------------------------
// Stages and errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Inputs,
    Normalize,
    Reconcile,
    PrepareSources,
    MergeDefense,
    PerGameTotals,
    Rank,
    MergeTeam,
    MergePlayer,
    FillVotes,
    MergeRoster,
    MergeBiometrics,
    Finalize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Inputs => "inputs",
            Stage::Normalize => "normalize",
            Stage::Reconcile => "reconcile",
            Stage::PrepareSources => "prepare_sources",
            Stage::MergeDefense => "merge_defense",
            Stage::PerGameTotals => "per_game_totals",
            Stage::Rank => "rank",
            Stage::MergeTeam => "merge_team",
            Stage::MergePlayer => "merge_player",
            Stage::FillVotes => "fill_votes",
            Stage::MergeRoster => "merge_roster",
            Stage::MergeBiometrics => "merge_biometrics",
            Stage::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Join(#[from] JoinError),

    #[error("source `{0}` is missing")]
    MissingSource(SourceId),
}

/// A failed run: which stage broke and why.
#[derive(Debug, Error)]
#[error("pipeline stage `{stage}` failed: {error}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub error: StageError,
}

trait InStage<T> {
    fn in_stage(self, stage: Stage) -> Result<T, PipelineError>;
}

impl<T, E: Into<StageError>> InStage<T> for Result<T, E> {
    fn in_stage(self, stage: Stage) -> Result<T, PipelineError> {
        self.map_err(|e| PipelineError {
            stage,
            error: e.into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Merge plan
// ---------------------------------------------------------------------------

/// One join of a source onto the accumulating table. `select` trims the
/// source to the listed columns first; `drop` then removes columns the
/// accumulating table already carries.
#[derive(Debug, Clone, Copy)]
struct MergeStep {
    source: SourceId,
    spec: JoinSpec,
    select: Option<&'static [&'static str]>,
    drop: &'static [&'static str],
}

/// Columns of the voting history that feed the analysis.
const DPOY_VOTING_COLUMNS: &[&str] = &[
    "Player", "Age", "Tm", "Season", "DPOY", "First", "Pts Won", "Pts Max", "Share", "G", "MP",
    "STL", "BLK", "DWS", "DBPM", "DRtg",
];

/// Context columns the 2pt/3pt splits repeat from the dashboard.
const SPLIT_CONTEXT_COLUMNS: &[&str] = &["Team", "Age", "Position", "GP", "FG_PCT"];

const DEFENSE_MERGES: [MergeStep; 5] = [
    MergeStep {
        source: SourceId::BoxOuts,
        spec: JoinSpec::left(PLAYER_SEASON),
        select: None,
        drop: &[],
    },
    MergeStep {
        source: SourceId::Defense2pt,
        spec: JoinSpec::left(PLAYER_SEASON),
        select: None,
        drop: SPLIT_CONTEXT_COLUMNS,
    },
    MergeStep {
        source: SourceId::Defense3pt,
        spec: JoinSpec::left(PLAYER_SEASON),
        select: None,
        drop: SPLIT_CONTEXT_COLUMNS,
    },
    MergeStep {
        source: SourceId::HustleStats,
        spec: JoinSpec::left(PLAYER_SEASON),
        select: None,
        drop: &["Min"],
    },
    MergeStep {
        source: SourceId::DpoyVoting,
        spec: JoinSpec::left(PLAYER_SEASON),
        select: Some(DPOY_VOTING_COLUMNS),
        drop: &["Age"],
    },
];

const TEAM_MERGES: [MergeStep; 2] = [
    MergeStep {
        source: SourceId::TeamStats,
        spec: JoinSpec::left(TEAM_SEASON),
        select: None,
        drop: &[],
    },
    MergeStep {
        source: SourceId::TeamAdvanced,
        spec: JoinSpec::left(TEAM_SEASON),
        select: None,
        drop: &[],
    },
];

/// Voting-era per-player columns, replaced by the advanced player stats once
/// team context is merged.
const VOTING_ERA_COLUMNS: &[&str] = &["STL", "BLK", "DWS", "DBPM", "DRtg", "G", "MP", "Tm"];

const PLAYER_MERGES: [MergeStep; 1] = [MergeStep {
    source: SourceId::PlayerAdvanced,
    spec: JoinSpec::left(PLAYER_SEASON),
    select: Some(&["Player", "Season", "STL", "BLK", "DWS", "DBPM", "DRtg"]),
    drop: &[],
}];

/// Inner joins: only players with a known roster height/weight and box
/// score totals survive.
const ROSTER_MERGES: [MergeStep; 2] = [
    MergeStep {
        source: SourceId::Rosters,
        spec: JoinSpec::inner(PLAYER_SEASON),
        select: Some(&["Season", "Player", "Height", "Weight"]),
        drop: &[],
    },
    MergeStep {
        source: SourceId::PlayerStats,
        spec: JoinSpec::inner(PLAYER_SEASON),
        select: Some(&["Player", "Season", "DRB", "MP"]),
        drop: &[],
    },
];

/// Season-independent measurements, joined on the player alone.
const BIOMETRIC_MERGES: [MergeStep; 2] = [
    MergeStep {
        source: SourceId::Combine,
        spec: JoinSpec::left(PLAYER_ONLY),
        select: None,
        drop: &["Season"],
    },
    MergeStep {
        source: SourceId::Wingspans,
        spec: JoinSpec::left(PLAYER_ONLY),
        select: None,
        drop: &["Height"],
    },
];

/// Name the accumulating table carries from the first merge on.
pub const MERGED_TABLE: &str = "merged";

const OPPONENT_SHOOTING: [(&str, &str, &str); 4] = [
    ("opp_FG_pct", "opp_FG", "opp_FGA"),
    ("opp_2P_pct", "opp_2P", "opp_2PA"),
    ("opp_3P_pct", "opp_3P", "opp_3PA"),
    ("opp_FT_pct", "opp_FT", "opp_FTA"),
];

const TEAM_STATS_DROPS: &[&str] = &[
    "Rk", "G", "STL", "opp_FG", "opp_FGA", "opp_2P", "opp_2PA", "opp_3P", "opp_3PA", "opp_FT",
    "opp_FTA",
];

const TEAM_ADVANCED_PERCENTS: &[&str] = &["opp_eFG%", "opp_TS%"];

const TEAM_ADVANCED_DROPS: &[&str] = &["Rk", "G", "W", "L", "W/L%", "tm_FTr"];

/// Combine length columns and the inches column derived from each.
const COMBINE_LENGTHS: [(&str, &str); 4] = [
    ("HEIGHT W/O SHOES", "HEIGHT W/O SHOES (in)"),
    ("HEIGHT W/ SHOES", "HEIGHT W/ SHOES (in)"),
    ("STANDING REACH", "STANDING REACH (in)"),
    ("WINGSPAN", "WINGSPAN (in)"),
];

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Run every stage in order and return the final table.
pub fn run(sources: SourceTables, config: &Config) -> Result<Table, PipelineError> {
    check_inputs(&sources).in_stage(Stage::Inputs)?;

    let sources = normalize_keys(sources, &config.renames).in_stage(Stage::Normalize)?;
    let sources = reconcile_sources(sources, &config.renames).in_stage(Stage::Reconcile)?;
    let mut sources = prepare_sources(sources).in_stage(Stage::PrepareSources)?;

    let base = take(&mut sources, SourceId::DefenseDashboard)
        .in_stage(Stage::MergeDefense)?
        .with_name(MERGED_TABLE);

    let table = merge_defense(base, &sources).in_stage(Stage::MergeDefense)?;
    logged(Stage::MergeDefense, &table);

    let table = per_game_totals(
        table,
        &config.renames.per_game_rates,
        &config.per_game_totals,
    )
    .in_stage(Stage::PerGameTotals)?;
    logged(Stage::PerGameTotals, &table);

    let table = rank_players(table, &config.ranking.metrics()).in_stage(Stage::Rank)?;
    logged(Stage::Rank, &table);

    let table = merge_team(table, &sources).in_stage(Stage::MergeTeam)?;
    logged(Stage::MergeTeam, &table);

    let table = merge_player(table, &sources).in_stage(Stage::MergePlayer)?;
    logged(Stage::MergePlayer, &table);

    let table = derive::zero_fill(table, &config.votes.zero_fill).in_stage(Stage::FillVotes)?;
    logged(Stage::FillVotes, &table);

    let table = merge_roster(
        table,
        &sources,
        &config.positions.column,
        &config.positions.replacements,
    )
    .in_stage(Stage::MergeRoster)?;
    logged(Stage::MergeRoster, &table);

    let table = merge_biometrics(table, &sources).in_stage(Stage::MergeBiometrics)?;
    logged(Stage::MergeBiometrics, &table);

    let table = finalize(table).in_stage(Stage::Finalize)?;
    logged(Stage::Finalize, &table);

    Ok(table.with_name("dpoy"))
}

fn logged(stage: Stage, table: &Table) {
    info!(
        "{}: {} rows x {} columns",
        stage,
        table.len(),
        table.width()
    );
}

fn check_inputs(sources: &SourceTables) -> Result<(), StageError> {
    match sources.missing().first() {
        Some(&id) => Err(StageError::MissingSource(id)),
        None => Ok(()),
    }
}

fn take(sources: &mut SourceTables, id: SourceId) -> Result<Table, StageError> {
    sources.take(id).ok_or(StageError::MissingSource(id))
}

// ---------------------------------------------------------------------------
// Source-level stages
// ---------------------------------------------------------------------------

/// Canonicalize player headers and normalize the `Player` key of every
/// source. Roster exports use upper-case headers; the combine export names
/// its key `PLAYER`.
pub fn normalize_keys(
    sources: SourceTables,
    renames: &RenameTables,
) -> Result<SourceTables, TableError> {
    sources.try_map(|id, table| {
        let table = match id {
            SourceId::Rosters => reconcile::capitalize_headers(table)?,
            SourceId::Combine => reconcile::rename_columns(table, &renames.combine)?,
            _ => table,
        };
        normalize_player_column(table)
    })
}

/// Apply the configured rename maps, each to its own source.
pub fn reconcile_sources(
    sources: SourceTables,
    renames: &RenameTables,
) -> Result<SourceTables, TableError> {
    sources.try_map(|id, table| match id {
        SourceId::Defense2pt => reconcile::rename_columns(table, &renames.defense_2pt),
        SourceId::Defense3pt => reconcile::rename_columns(table, &renames.defense_3pt),
        SourceId::TeamStats => {
            let table = reconcile::rename_columns(table, &renames.team_stats_opponent)?;
            reconcile::rename_columns(table, &renames.team_stats_team)
        }
        SourceId::TeamAdvanced => {
            let table = reconcile::rename_columns(table, &renames.team_advanced_opponent)?;
            reconcile::rename_columns(table, &renames.team_advanced_team)
        }
        SourceId::Wingspans => reconcile::rename_columns(table, &renames.wingspans),
        _ => Ok(table),
    })
}

/// Per-source derivations that must happen before the sources are merged.
pub fn prepare_sources(sources: SourceTables) -> Result<SourceTables, TableError> {
    sources.try_map(|id, table| match id {
        SourceId::TeamStats => prepare_team_stats(table),
        SourceId::TeamAdvanced => prepare_team_advanced(table),
        SourceId::Rosters => prepare_rosters(table),
        SourceId::Combine => prepare_combine(table),
        SourceId::Wingspans => prepare_wingspans(table),
        _ => Ok(table),
    })
}

/// Opponent shooting percentages from makes/attempts, then drop the raw
/// opponent counts and the columns the player rows already carry.
pub fn prepare_team_stats(table: Table) -> Result<Table, TableError> {
    let table = OPPONENT_SHOOTING
        .iter()
        .try_fold(table, |t, &(target, makes, attempts)| {
            derive::add_pct_column(t, target, makes, attempts)
        })?;
    table.drop_columns(TEAM_STATS_DROPS)
}

/// Opponent eFG%/TS% arrive as fractions; make them percentages.
pub fn prepare_team_advanced(table: Table) -> Result<Table, TableError> {
    let table = TEAM_ADVANCED_PERCENTS
        .iter()
        .try_fold(table, |t, column| derive::scale_column(t, column, 100.0))?;
    table.drop_columns(TEAM_ADVANCED_DROPS)
}

/// Roster seasons are start years (`2023`); heights are `6-9`.
pub fn prepare_rosters(table: Table) -> Result<Table, TableError> {
    let table = derive::season_label_column(table, "Season")?;
    derive::convert_length_column(table, "Height", "Height", derive::hyphen_height_to_inches)
}

pub fn prepare_combine(table: Table) -> Result<Table, TableError> {
    let table = COMBINE_LENGTHS
        .iter()
        .try_fold(table, |t, &(source, target)| {
            derive::convert_length_column(t, source, target, derive::feet_inches_to_inches)
        })?;
    derive::percent_column(table, "BODY FAT %")
}

/// The wingspan export packs extra text under the name; keep the first line.
pub fn prepare_wingspans(table: Table) -> Result<Table, TableError> {
    let table = derive::first_line_column(table, "Player")?;
    derive::convert_length_column(table, "Wingspan", "Wingspan", derive::feet_inches_to_inches)
}

// ---------------------------------------------------------------------------
// Merge stages
// ---------------------------------------------------------------------------

fn apply_merges(
    table: Table,
    sources: &SourceTables,
    steps: &[MergeStep],
) -> Result<Table, StageError> {
    steps.iter().try_fold(table, |acc, step| {
        let source = sources
            .get(step.source)
            .ok_or(StageError::MissingSource(step.source))?
            .clone();
        let source = match step.select {
            Some(columns) => source.select(columns)?,
            None => source,
        };
        let right = source.drop_columns(step.drop)?;
        Ok(join::join(acc, &right, step.spec)?)
    })
}

/// Box outs, 2pt/3pt splits, hustle stats and voting history onto the
/// defense dashboard, all left joins on (Player, Season).
pub fn merge_defense(base: Table, sources: &SourceTables) -> Result<Table, StageError> {
    apply_merges(base, sources, &DEFENSE_MERGES)
}

/// Rename the per-game rate columns out of the way, then rebuild season
/// totals under the freed names.
pub fn per_game_totals(
    table: Table,
    rate_renames: &ColumnMap,
    totals: &[PerGameTotal],
) -> Result<Table, TableError> {
    let table = reconcile::rename_columns(table, rate_renames)?;
    totals.iter().try_fold(table, |t, total| {
        if t.has_column(&total.total) {
            return Err(TableError::DuplicateColumn {
                table: t.name().to_string(),
                column: total.total.clone(),
            });
        }
        derive::add_total_column(t, &total.total, &total.rate, &total.games)
    })
}

pub fn rank_players(table: Table, metrics: &[RankedMetric]) -> Result<Table, TableError> {
    rank::rank_by_season(table, metrics)
}

/// Team and opponent context, then drop the voting-era player columns that
/// the advanced player stats replace.
pub fn merge_team(table: Table, sources: &SourceTables) -> Result<Table, StageError> {
    let table = apply_merges(table, sources, &TEAM_MERGES)?;
    Ok(table.drop_columns(VOTING_ERA_COLUMNS)?)
}

pub fn merge_player(table: Table, sources: &SourceTables) -> Result<Table, StageError> {
    apply_merges(table, sources, &PLAYER_MERGES)
}

/// Narrow to rostered players with box score totals, then fold hybrid
/// positions into a single one.
pub fn merge_roster(
    table: Table,
    sources: &SourceTables,
    position_column: &str,
    replacements: &ColumnMap,
) -> Result<Table, StageError> {
    let table = apply_merges(table, sources, &ROSTER_MERGES)?;
    Ok(derive::replace_values(table, position_column, replacements)?)
}

pub fn merge_biometrics(table: Table, sources: &SourceTables) -> Result<Table, StageError> {
    apply_merges(table, sources, &BIOMETRIC_MERGES)
}

/// Final order (season descending, average rank ascending) and the output
/// invariant: one row per (Player, Season).
pub fn finalize(table: Table) -> Result<Table, StageError> {
    join::ensure_unique_keys(&table, PLAYER_SEASON)?;
    Ok(rank::sort_by_season_and_rank(table)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn stage_error_names_the_stage() {
        let err = Err::<(), _>(StageError::MissingSource(SourceId::Rosters))
            .in_stage(Stage::MergeRoster)
            .unwrap_err();
        assert_eq!(err.stage, Stage::MergeRoster);
        assert_eq!(
            err.to_string(),
            "pipeline stage `merge_roster` failed: source `rosters` is missing"
        );
    }

    #[test]
    fn missing_sources_fail_inputs_stage() {
        let mut sources = SourceTables::new();
        let frame = df!("Player" => ["a"], "Season" => ["2023-24"]).unwrap();
        sources.insert(SourceId::DefenseDashboard, Table::new("x", frame));
        let err = check_inputs(&sources).unwrap_err();
        assert!(matches!(err, StageError::MissingSource(SourceId::BoxOuts)));
    }

    #[test]
    fn team_stats_opponent_percentages() {
        let frame = df!(
            "Rk" => [1.0],
            "Team" => ["BOS"],
            "Season" => ["2023-24"],
            "G" => [82.0],
            "STL" => [6.7],
            "opp_FG" => [45.0],
            "opp_FGA" => [100.0],
            "opp_2P" => [30.0],
            "opp_2PA" => [60.0],
            "opp_3P" => [15.0],
            "opp_3PA" => [40.0],
            "opp_FT" => [0.0],
            "opp_FTA" => [0.0],
            "tm_BLK" => [6.6],
        )
        .unwrap();
        let out = prepare_team_stats(Table::new("team_stats", frame)).unwrap();
        assert_eq!(
            out.columns(),
            vec![
                "Team",
                "Season",
                "tm_BLK",
                "opp_FG_pct",
                "opp_2P_pct",
                "opp_3P_pct",
                "opp_FT_pct"
            ]
        );
        assert_eq!(out.number_at(0, "opp_FG_pct"), Some(45.0));
        assert_eq!(out.number_at(0, "opp_2P_pct"), Some(50.0));
        assert_eq!(out.number_at(0, "opp_3P_pct"), Some(37.5));
        assert_eq!(out.number_at(0, "opp_FT_pct"), None);
    }

    #[test]
    fn rosters_get_season_labels_and_inches() {
        let frame = df!(
            "Season" => [2023.0, 2023.0],
            "Player" => ["bam adebayo", "unknown"],
            "Height" => ["6-9", "?"],
            "Weight" => [255.0, 200.0],
        )
        .unwrap();
        let out = prepare_rosters(Table::new("rosters", frame)).unwrap();
        assert_eq!(out.text_at(0, "Season"), Some("2023-24".to_string()));
        assert_eq!(out.number_at(0, "Height"), Some(81.0));
        assert_eq!(out.number_at(1, "Height"), None);
    }

    #[test]
    fn per_game_totals_rename_then_rebuild() {
        let frame = df!(
            "Player" => ["a"],
            "Season" => ["2023-24"],
            "GP" => [70.0],
            "BLK" => [2.0],
            "STL" => [1.5],
        )
        .unwrap();
        let mut rates = ColumnMap::new();
        rates.insert("BLK".into(), "BPG".into());
        rates.insert("STL".into(), "SPG".into());
        let totals = vec![
            PerGameTotal {
                total: "BLK".into(),
                rate: "BPG".into(),
                games: "GP".into(),
            },
            PerGameTotal {
                total: "STL".into(),
                rate: "SPG".into(),
                games: "GP".into(),
            },
        ];
        let out = per_game_totals(Table::new(MERGED_TABLE, frame), &rates, &totals).unwrap();
        assert_eq!(out.number_at(0, "BPG"), Some(2.0));
        assert_eq!(out.number_at(0, "BLK"), Some(140.0));
        assert_eq!(out.number_at(0, "STL"), Some(105.0));
    }

    #[test]
    fn per_game_total_refuses_to_overwrite() {
        let frame = df!("GP" => [70.0], "BLK" => [2.0]).unwrap();
        let totals = vec![PerGameTotal {
            total: "BLK".into(),
            rate: "BLK".into(),
            games: "GP".into(),
        }];
        let err = per_game_totals(Table::new(MERGED_TABLE, frame), &ColumnMap::new(), &totals)
            .unwrap_err();
        match err {
            TableError::DuplicateColumn { table, column } => {
                assert_eq!(table, MERGED_TABLE);
                assert_eq!(column, "BLK");
            }
            other => panic!("expected DuplicateColumn, got: {other}"),
        }
    }

    #[test]
    fn finalize_rejects_duplicate_player_seasons() {
        let frame = df!(
            "Player" => ["a", "a"],
            "Season" => ["2023-24", "2023-24"],
            "average_rank" => [1.0, 2.0],
        )
        .unwrap();
        let err = finalize(Table::new(MERGED_TABLE, frame)).unwrap_err();
        assert!(matches!(
            err,
            StageError::Join(JoinError::DuplicateKey { .. })
        ));
    }
}
