use chrono::NaiveDate;
use rusqlite::ToSql;
use serde::Serialize;
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::position::PositionCode;
use crate::query::CohortFilters;
use crate::store::{RowView, StoreGateway, Table};

/// Counting columns aggregated with SUM when a player has several rows in
/// one season (mid-season transfers, multi-competition seasons).
const SUMMED_COLUMNS: [&str; 55] = [
    "minutes",
    "matches",
    "goals",
    "penalty_goals",
    "shots",
    "shots_on_target",
    "xg",
    "npxg",
    "assists",
    "xa",
    "key_passes",
    "passes_attempted",
    "passes_completed",
    "progressive_passes",
    "passes_into_final_third",
    "passes_into_penalty_area",
    "crosses",
    "crosses_completed",
    "tackles",
    "tackles_won",
    "interceptions",
    "blocks",
    "clearances",
    "aerial_duels",
    "aerial_duels_won",
    "dribbled_past",
    "touches",
    "carries",
    "progressive_carries",
    "dribbles_attempted",
    "dribbles_completed",
    "dispossessed",
    "miscontrols",
    "fouls_committed",
    "fouls_drawn",
    "yellow_cards",
    "red_cards",
    "saves",
    "shots_on_target_against",
    "goals_conceded",
    "clean_sheets",
    "penalties_faced",
    "penalties_saved",
    "sweeper_actions",
    "touches_def_third",
    "touches_mid_third",
    "touches_att_third",
    "touches_left",
    "touches_centre",
    "touches_right",
    "touches_own_box",
    "touches_opp_box",
    "passes_forward",
    "passes_backward",
    "passes_lateral",
];

/// Location columns are minutes-weighted means across a player's rows.
const WEIGHTED_COLUMNS: [&str; 4] = ["avg_x", "avg_y", "std_x", "std_y"];

/// Positional event counts get summed too but are listed separately so
/// the role engine can name its own input.
const EVENT_COLUMN: &str = "positional_events";

#[derive(Debug, Clone)]
pub struct CohortMember {
    pub player_id: i64,
    pub name: String,
    pub position: PositionCode,
    pub age: Option<u32>,
    pub minutes: f64,
    row_idx: usize,
}

/// One query's cohort: the player-seasons surviving every filter, in
/// stable player-id order. The backing table carries the aggregated
/// season row for each member.
pub struct Cohort {
    pub descriptor: CohortDescriptor,
    table: Table,
    members: Vec<CohortMember>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CohortDescriptor {
    pub season: String,
    pub leagues: Vec<String>,
    pub positions: Vec<PositionCode>,
    pub age_min: Option<u32>,
    pub age_max: Option<u32>,
    pub min_minutes: u32,
    pub size: usize,
}

impl Cohort {
    pub fn members(&self) -> &[CohortMember] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member(&self, player_id: i64) -> Option<&CohortMember> {
        self.members
            .binary_search_by_key(&player_id, |m| m.player_id)
            .ok()
            .map(|idx| &self.members[idx])
    }

    pub fn row(&self, member: &CohortMember) -> RowView<'_> {
        self.table.row(member.row_idx)
    }
}

/// Cohort construction inputs: the query filters plus an optional extra
/// position restriction (the similarity reference's compatibility set).
pub struct CohortSpec<'a> {
    pub season: &'a str,
    pub filters: &'a CohortFilters,
    pub min_minutes: u32,
    pub allowed_positions: Option<&'a [PositionCode]>,
}

/// Shared SELECT head: per-player aggregation of a season's rows with
/// counting columns summed and location columns minutes-weighted.
fn aggregate_select_sql() -> String {
    let mut sql = String::from("SELECT p.player_id, p.name, p.position, p.birth_date");
    for col in SUMMED_COLUMNS.into_iter().chain([EVENT_COLUMN]) {
        sql.push_str(&format!(", SUM(s.{col}) AS {col}"));
    }
    for col in WEIGHTED_COLUMNS {
        sql.push_str(&format!(
            ", SUM(s.{col} * s.minutes) / NULLIF(SUM(s.minutes), 0) AS {col}"
        ));
    }
    sql.push_str("\nFROM player_season_stats s\nJOIN players p ON p.player_id = s.player_id");
    sql
}

pub fn build_cohort(store: &StoreGateway, spec: &CohortSpec<'_>) -> Result<Cohort> {
    let season_id = resolve_season(store, spec.season)?;
    let league_ids = resolve_leagues(store, &spec.filters.leagues)?;

    let mut sql = aggregate_select_sql();
    sql.push_str("\nWHERE s.season_id = :season");

    let mut names: Vec<String> = vec![":season".to_string()];
    let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(season_id)];

    if !league_ids.is_empty() {
        let mut placeholders = Vec::with_capacity(league_ids.len());
        for (idx, league_id) in league_ids.iter().enumerate() {
            let name = format!(":league{idx}");
            placeholders.push(name.clone());
            names.push(name);
            values.push(Box::new(*league_id));
        }
        sql.push_str(&format!(
            " AND s.league_id IN ({})",
            placeholders.join(", ")
        ));
    }

    sql.push_str(
        "\nGROUP BY p.player_id, p.name, p.position, p.birth_date\nHAVING SUM(s.minutes) >= :min_minutes\nORDER BY p.player_id",
    );
    names.push(":min_minutes".to_string());
    values.push(Box::new(spec.min_minutes as i64));

    let params: Vec<(&str, &dyn ToSql)> = names
        .iter()
        .map(|n| n.as_str())
        .zip(values.iter().map(|v| v.as_ref() as &dyn ToSql))
        .collect();
    let table = store.fetch(&sql, &params)?;

    let reference_date = season_reference_date(spec.season);
    let position_filter: Option<Vec<PositionCode>> = if spec.filters.positions.is_empty() {
        None
    } else {
        Some(
            spec.filters
                .positions
                .iter()
                .flat_map(|p| p.filter_expansion())
                .collect(),
        )
    };

    let mut members = Vec::new();
    for (row_idx, row) in table.rows().enumerate() {
        let Some(player_id) = row.i64("player_id") else {
            continue;
        };
        let Some(position) = row.str("position").and_then(PositionCode::from_code) else {
            continue;
        };

        if let Some(allowed) = &position_filter {
            if !allowed.contains(&position) {
                continue;
            }
        }
        if let Some(allowed) = spec.allowed_positions {
            if !allowed.contains(&position) {
                continue;
            }
        }

        let age = row
            .str("birth_date")
            .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
            .map(|birth| whole_years_between(birth, reference_date));
        if let Some(min) = spec.filters.age_min {
            if age.map_or(true, |a| a < min) {
                continue;
            }
        }
        if let Some(max) = spec.filters.age_max {
            if age.map_or(true, |a| a > max) {
                continue;
            }
        }

        members.push(CohortMember {
            player_id,
            name: row.str("name").unwrap_or_default().to_string(),
            position,
            age,
            minutes: row.f64("minutes").unwrap_or(0.0),
            row_idx,
        });
    }

    debug!(
        season = spec.season,
        fetched = table.len(),
        members = members.len(),
        "cohort built"
    );

    let descriptor = CohortDescriptor {
        season: spec.season.to_string(),
        leagues: spec.filters.leagues.clone(),
        positions: spec.filters.positions.clone(),
        age_min: spec.filters.age_min,
        age_max: spec.filters.age_max,
        min_minutes: spec.min_minutes,
        size: members.len(),
    };

    Ok(Cohort {
        descriptor,
        table,
        members,
    })
}

/// Aggregated season row for one player, outside any cohort. Used by
/// direct metric lookups; the table is empty when the player has no rows
/// for the season.
pub fn player_season_table(
    store: &StoreGateway,
    player_id: i64,
    season: &str,
) -> Result<Table> {
    let season_id = resolve_season(store, season)?;

    let mut sql = aggregate_select_sql();
    sql.push_str(
        "\nWHERE s.player_id = :player AND s.season_id = :season\nGROUP BY p.player_id, p.name, p.position, p.birth_date",
    );

    store.fetch(
        &sql,
        &[(":player", &player_id), (":season", &season_id)],
    )
}

// ---------------------------------------------------------------------------
// Store lookups shared by the executor and the parser
// ---------------------------------------------------------------------------

pub fn resolve_season(store: &StoreGateway, label: &str) -> Result<i64> {
    let table = store.fetch(
        "SELECT season_id FROM seasons WHERE LOWER(label) = LOWER(:label)",
        &[(":label", &label)],
    )?;
    let result = table
        .rows()
        .next()
        .and_then(|row| row.i64("season_id"))
        .ok_or_else(|| CoreError::UnknownSeason(label.to_string()));
    result
}

pub fn latest_season_label(store: &StoreGateway) -> Result<String> {
    let table = store.fetch("SELECT label FROM seasons ORDER BY label DESC LIMIT 1", &[])?;
    let result = table
        .rows()
        .next()
        .and_then(|row| row.str("label").map(|s| s.to_string()))
        .ok_or_else(|| CoreError::UnknownSeason("no seasons in store".to_string()));
    result
}

fn resolve_leagues(store: &StoreGateway, leagues: &[String]) -> Result<Vec<i64>> {
    let mut out = Vec::with_capacity(leagues.len());
    for name in leagues {
        let table = store.fetch(
            "SELECT league_id FROM leagues WHERE LOWER(name) = LOWER(:name)",
            &[(":name", name)],
        )?;
        let id = table
            .rows()
            .next()
            .and_then(|row| row.i64("league_id"))
            .ok_or_else(|| CoreError::UnknownLeague(name.clone()))?;
        out.push(id);
    }
    Ok(out)
}

pub fn league_names(store: &StoreGateway) -> Result<Vec<String>> {
    let table = store.fetch("SELECT name FROM leagues ORDER BY name", &[])?;
    Ok(table
        .rows()
        .filter_map(|row| row.str("name").map(|s| s.to_string()))
        .collect())
}

#[derive(Debug, Clone)]
pub struct PlayerInfo {
    pub player_id: i64,
    pub name: String,
    pub position: PositionCode,
}

pub fn lookup_player_by_id(store: &StoreGateway, player_id: i64) -> Result<PlayerInfo> {
    let table = store.fetch(
        "SELECT player_id, name, position FROM players WHERE player_id = :id",
        &[(":id", &player_id)],
    )?;
    player_from_table(&table).ok_or_else(|| CoreError::UnknownPlayer(player_id.to_string()))
}

/// Case-insensitive exact name match. An ambiguous name is an error, not
/// a guess.
pub fn lookup_player_by_name(store: &StoreGateway, name: &str) -> Result<PlayerInfo> {
    let table = store.fetch(
        "SELECT player_id, name, position FROM players WHERE LOWER(name) = LOWER(:name) ORDER BY player_id",
        &[(":name", &name)],
    )?;
    if table.len() > 1 {
        return Err(CoreError::UnknownPlayer(format!(
            "'{name}' matches {} players",
            table.len()
        )));
    }
    player_from_table(&table).ok_or_else(|| CoreError::UnknownPlayer(name.to_string()))
}

fn player_from_table(table: &Table) -> Option<PlayerInfo> {
    let row = table.rows().next()?;
    Some(PlayerInfo {
        player_id: row.i64("player_id")?,
        name: row.str("name")?.to_string(),
        position: PositionCode::from_code(row.str("position")?)?,
    })
}

// ---------------------------------------------------------------------------
// Season dates
// ---------------------------------------------------------------------------

/// Ages are evaluated at 1 July of the season's starting year, matching
/// the ingestion pipeline's convention for European seasons.
fn season_reference_date(label: &str) -> NaiveDate {
    let year: i32 = label
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .unwrap_or(2000);
    NaiveDate::from_ymd_opt(year, 7, 1).unwrap_or_default()
}

fn whole_years_between(birth: NaiveDate, reference: NaiveDate) -> u32 {
    use chrono::Datelike;
    let mut years = reference.year() - birth.year();
    if (reference.month(), reference.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    years.max(0) as u32
}

pub fn stats_columns() -> impl Iterator<Item = &'static str> {
    SUMMED_COLUMNS
        .into_iter()
        .chain(WEIGHTED_COLUMNS)
        .chain(std::iter::once(EVENT_COLUMN))
}
