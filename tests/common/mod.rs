#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use rusqlite::{params_from_iter, Connection};

use scout_core::{CoreConfig, ScoutCore};

static DB_COUNTER: AtomicU32 = AtomicU32::new(0);

pub const PREMIER_LEAGUE: i64 = 1;
pub const LA_LIGA: i64 = 2;
pub const SEASON_2024: i64 = 1;
pub const SEASON_2023: i64 = 2;

/// The reference striker used by the end-to-end scenarios.
pub const REF_STRIKER: i64 = 42;
pub const NAMED_MIDFIELDER: i64 = 21;
pub const LOW_MINUTES_STRIKER: i64 = 70;
pub const NULL_XG_STRIKER: i64 = 71;
pub const NO_EVENTS_STRIKER: i64 = 72;
pub const ZERO_MINUTES_STRIKER: i64 = 73;

#[derive(Clone, Copy, PartialEq)]
enum Role {
    Gk,
    Df,
    Mf,
    Fw,
}

pub fn catalogue_path() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("assets");
    path.push("metric_catalogue.json");
    path
}

/// Build a fresh store file and return its path. Seeding writes through
/// a plain connection; the gateway under test only ever reads it.
pub fn seed_store() -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "scout_core_test_{}_{}.sqlite",
        std::process::id(),
        DB_COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    let _ = std::fs::remove_file(&path);

    let conn = Connection::open(&path).expect("create seed store");
    create_schema(&conn);
    seed_players(&conn);
    path
}

pub fn open_core(store: &PathBuf) -> ScoutCore {
    open_core_with(store, CoreConfig::default())
}

pub fn open_core_with(store: &PathBuf, config: CoreConfig) -> ScoutCore {
    ScoutCore::open(store, &catalogue_path(), config).expect("core should open")
}

pub fn row_count(store: &PathBuf, table: &str) -> i64 {
    let conn = Connection::open(store).expect("open store for counting");
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })
    .expect("count rows")
}

fn create_schema(conn: &Connection) {
    conn.execute_batch(
        r#"
        CREATE TABLE players (
            player_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            birth_date TEXT,
            nationality TEXT,
            position TEXT NOT NULL,
            preferred_foot TEXT
        );
        CREATE TABLE teams (team_id INTEGER PRIMARY KEY, name TEXT NOT NULL);
        CREATE TABLE leagues (league_id INTEGER PRIMARY KEY, name TEXT NOT NULL);
        CREATE TABLE seasons (season_id INTEGER PRIMARY KEY, label TEXT NOT NULL);
        "#,
    )
    .expect("create dimension tables");

    let mut ddl = String::from(
        "CREATE TABLE player_season_stats (\n player_id INTEGER NOT NULL,\n team_id INTEGER NOT NULL,\n league_id INTEGER NOT NULL,\n season_id INTEGER NOT NULL",
    );
    for col in scout_core::cohort::stats_columns() {
        ddl.push_str(&format!(",\n {col} REAL"));
    }
    ddl.push_str("\n);");
    conn.execute_batch(&ddl).expect("create stats table");

    conn.execute_batch(
        r#"
        INSERT INTO leagues (league_id, name) VALUES (1, 'Premier League'), (2, 'La Liga');
        INSERT INTO seasons (season_id, label) VALUES (1, '2024-25'), (2, '2023-24');
        INSERT INTO teams (team_id, name) VALUES (1, 'Test United'), (2, 'Test City');
        "#,
    )
    .expect("seed dimensions");
}

fn seed_players(conn: &Connection) {
    // Goalkeepers.
    for (offset, id) in (1..=3).enumerate() {
        insert_player(conn, id, &format!("Keeper {id:02}"), "GK", 1992 + offset as i32);
        insert_stats(
            conn,
            id,
            PREMIER_LEAGUE,
            SEASON_2024,
            &stat_profile(Role::Gk, 2400.0 + offset as f64 * 90.0, offset as f64),
        );
    }

    // Defenders.
    let defender_codes = ["CB", "CB", "CB", "CB", "LB", "RB", "WB", "CB"];
    for (offset, code) in defender_codes.iter().enumerate() {
        let id = 10 + offset as i64;
        insert_player(conn, id, &format!("Defender {id:02}"), code, 1994 + (offset as i32 % 8));
        insert_stats(
            conn,
            id,
            PREMIER_LEAGUE,
            SEASON_2024,
            &stat_profile(Role::Df, 1600.0 + offset as f64 * 80.0, offset as f64),
        );
    }

    // Midfielders; one carries a stable name for parser tests.
    let midfield_codes = ["CM", "CM", "CM", "CM", "DM", "DM", "DM", "AM", "AM", "AM"];
    for (offset, code) in midfield_codes.iter().enumerate() {
        let id = 20 + offset as i64;
        let name = if id == NAMED_MIDFIELDER {
            "Kai Mercer".to_string()
        } else {
            format!("Midfielder {id:02}")
        };
        insert_player(conn, id, &name, code, 1996 + (offset as i32 % 7));
        insert_stats(
            conn,
            id,
            PREMIER_LEAGUE,
            SEASON_2024,
            &stat_profile(Role::Mf, 1400.0 + offset as f64 * 70.0, offset as f64),
        );
    }

    // Forwards: the similarity cohort. 16 strikers plus wingers.
    for offset in 0..24 {
        let id = 40 + offset as i64;
        let code = match offset {
            0..=15 => "ST",
            16..=19 => "LW",
            _ => "RW",
        };
        let name = if id == REF_STRIKER {
            "Dario Fenwick".to_string()
        } else {
            format!("Forward {id:02}")
        };
        insert_player(conn, id, &name, code, 1995 + (offset as i32 % 9));
        insert_stats(
            conn,
            id,
            PREMIER_LEAGUE,
            SEASON_2024,
            &stat_profile(Role::Fw, 1200.0 + offset as f64 * 60.0, offset as f64),
        );
    }

    // Boundary players.
    insert_player(conn, LOW_MINUTES_STRIKER, "Milo Undercook", "ST", 2003);
    insert_stats(
        conn,
        LOW_MINUTES_STRIKER,
        PREMIER_LEAGUE,
        SEASON_2024,
        &stat_profile(Role::Fw, 200.0, 30.0),
    );

    insert_player(conn, NULL_XG_STRIKER, "Sem Vastra", "ST", 1998);
    let mut no_xg = stat_profile(Role::Fw, 1500.0, 31.0);
    no_xg.retain(|(col, _)| col != "xg" && col != "npxg");
    insert_stats(conn, NULL_XG_STRIKER, PREMIER_LEAGUE, SEASON_2024, &no_xg);

    insert_player(conn, NO_EVENTS_STRIKER, "Otis Ghost", "ST", 1997);
    let mut no_events = stat_profile(Role::Fw, 1200.0, 32.0);
    for (col, value) in &mut no_events {
        if col == "positional_events" {
            *value = 0.0;
        }
    }
    insert_stats(conn, NO_EVENTS_STRIKER, PREMIER_LEAGUE, SEASON_2024, &no_events);

    insert_player(conn, ZERO_MINUTES_STRIKER, "Unused Sub", "ST", 2005);
    insert_stats(
        conn,
        ZERO_MINUTES_STRIKER,
        PREMIER_LEAGUE,
        SEASON_2024,
        &stat_profile(Role::Fw, 0.0, 33.0),
    );

    // A deliberately small La Liga cohort.
    for offset in 0..5 {
        let id = 80 + offset as i64;
        insert_player(conn, id, &format!("Visitor {id:02}"), "CM", 1995 + offset as i32);
        insert_stats(
            conn,
            id,
            LA_LIGA,
            SEASON_2024,
            &stat_profile(Role::Mf, 1300.0 + offset as f64 * 50.0, offset as f64 + 40.0),
        );
    }

    // Prior-season rows for multi-season lookups.
    insert_stats(
        conn,
        REF_STRIKER,
        PREMIER_LEAGUE,
        SEASON_2023,
        &stat_profile(Role::Fw, 2100.0, 12.0),
    );
    insert_stats(
        conn,
        NAMED_MIDFIELDER,
        PREMIER_LEAGUE,
        SEASON_2023,
        &stat_profile(Role::Mf, 1900.0, 13.0),
    );
}

fn insert_player(conn: &Connection, id: i64, name: &str, position: &str, birth_year: i32) {
    conn.execute(
        "INSERT INTO players (player_id, name, birth_date, nationality, position, preferred_foot)
         VALUES (?1, ?2, ?3, 'XX', ?4, 'right')",
        rusqlite::params![id, name, format!("{birth_year}-03-14"), position],
    )
    .expect("insert player");
}

fn insert_stats(
    conn: &Connection,
    player_id: i64,
    league_id: i64,
    season_id: i64,
    cols: &[(String, f64)],
) {
    let names: Vec<&str> = cols.iter().map(|(name, _)| name.as_str()).collect();
    let placeholders: Vec<String> = (5..5 + cols.len()).map(|n| format!("?{n}")).collect();
    let sql = format!(
        "INSERT INTO player_season_stats (player_id, team_id, league_id, season_id, {})
         VALUES (?1, ?2, ?3, ?4, {})",
        names.join(", "),
        placeholders.join(", ")
    );

    let mut values: Vec<rusqlite::types::Value> = vec![
        player_id.into(),
        1_i64.into(),
        league_id.into(),
        season_id.into(),
    ];
    for (_, value) in cols {
        values.push((*value).into());
    }
    conn.execute(&sql, params_from_iter(values))
        .expect("insert stats row");
}

/// Deterministic per-player season line. The seed fans players out so
/// vectors differ while remaining reproducible across runs.
fn stat_profile(role: Role, minutes: f64, seed: f64) -> Vec<(String, f64)> {
    let jitter = |base: f64, scale: f64| base + (seed * 7.0) % scale;

    let goals = match role {
        Role::Fw => 6.0 + (seed * 0.9) % 9.0,
        Role::Mf => 2.0 + seed % 4.0,
        Role::Df => seed % 2.0,
        Role::Gk => 0.0,
    };
    let penalty_goals = (goals * 0.15).floor();
    let shots = match role {
        Role::Fw => 45.0 + seed * 1.5,
        Role::Mf => 25.0 + seed,
        Role::Df => 8.0 + seed % 5.0,
        Role::Gk => 0.0,
    };
    let assists = match role {
        Role::Fw | Role::Mf => 2.0 + seed % 6.0,
        Role::Df => seed % 3.0,
        Role::Gk => 0.0,
    };
    let passes_attempted = match role {
        Role::Mf => 900.0 + seed * 14.0,
        Role::Df => 800.0 + seed * 12.0,
        Role::Fw => 450.0 + seed * 9.0,
        Role::Gk => 500.0 + seed * 8.0,
    };
    let passes_completed = passes_attempted * (0.72 + (seed % 9.0) * 0.02);
    let touches = match role {
        Role::Mf => 1500.0 + seed * 22.0,
        Role::Df => 1300.0 + seed * 18.0,
        Role::Fw => 900.0 + seed * 15.0,
        Role::Gk => 700.0 + seed * 10.0,
    };
    let tackles = match role {
        Role::Df => 45.0 + seed,
        Role::Mf => 35.0 + seed,
        Role::Fw => 12.0 + seed % 6.0,
        Role::Gk => 0.0,
    };
    let aerial_duels = match role {
        Role::Df => 70.0 + seed,
        Role::Fw => 40.0 + seed,
        Role::Mf => 25.0 + seed,
        Role::Gk => 8.0,
    };
    let dribbles_attempted = match role {
        Role::Fw => 50.0 + seed * 1.2,
        Role::Mf => 30.0 + seed,
        Role::Df => 10.0 + seed % 4.0,
        Role::Gk => 1.0,
    };
    let crosses = match role {
        Role::Fw => 30.0 + jitter(0.0, 12.0),
        Role::Mf => 20.0 + jitter(0.0, 10.0),
        Role::Df => 14.0 + jitter(0.0, 8.0),
        Role::Gk => 0.0,
    };

    // Spatial profile per role.
    let (avg_x, third_split, own_box_share, opp_box_share) = match role {
        Role::Gk => (8.0, (0.86, 0.12, 0.02), 0.62, 0.0),
        Role::Df => (32.0 + jitter(0.0, 6.0), (0.54, 0.36, 0.10), 0.12, 0.01),
        Role::Mf => (52.0 + jitter(0.0, 6.0), (0.24, 0.52, 0.24), 0.03, 0.03),
        Role::Fw => (70.0 + jitter(0.0, 8.0), (0.10, 0.34, 0.56), 0.01, 0.10),
    };
    let avg_y = 34.0 + (seed * 11.0) % 32.0;
    let std_x = 7.0 + (seed * 3.0) % 6.0;
    let std_y = 9.0 + (seed * 5.0) % 7.0;

    let (fwd_share, back_share, lat_share) = match role {
        Role::Gk => (0.55, 0.05, 0.30),
        Role::Df => (0.40, 0.18, 0.32),
        Role::Mf => (0.34, 0.26, 0.30),
        Role::Fw => (0.28, 0.34, 0.28),
    };

    let saves = if role == Role::Gk { 90.0 + seed * 3.0 } else { 0.0 };
    let shots_on_target_against = if role == Role::Gk { saves / 0.71 } else { 0.0 };

    let mut out: Vec<(String, f64)> = Vec::new();
    let mut push = |name: &str, value: f64| out.push((name.to_string(), value));

    push("minutes", minutes);
    push("matches", (minutes / 90.0).ceil());
    push("goals", goals);
    push("penalty_goals", penalty_goals);
    push("shots", shots);
    push("shots_on_target", shots * 0.42);
    push("xg", goals * 0.9 + (seed % 5.0) * 0.3);
    push("npxg", (goals - penalty_goals) * 0.9 + (seed % 5.0) * 0.25);
    push("assists", assists);
    push("xa", assists * 0.85 + (seed % 4.0) * 0.2);
    push("key_passes", 18.0 + jitter(0.0, 20.0));
    push("passes_attempted", passes_attempted);
    push("passes_completed", passes_completed);
    push("progressive_passes", passes_completed * 0.08);
    push("passes_into_final_third", passes_completed * 0.11);
    push("passes_into_penalty_area", passes_completed * 0.04);
    push("crosses", crosses);
    push("crosses_completed", crosses * 0.31);
    push("tackles", tackles);
    push("tackles_won", tackles * 0.62);
    push("interceptions", tackles * 0.7);
    push("blocks", 8.0 + seed % 7.0);
    push("clearances", if role == Role::Df { 60.0 + seed } else { 10.0 + seed % 8.0 });
    push("aerial_duels", aerial_duels);
    push("aerial_duels_won", aerial_duels * (0.44 + (seed % 6.0) * 0.02));
    push("dribbled_past", 9.0 + seed % 9.0);
    push("touches", touches);
    push("carries", touches * 0.45);
    push("progressive_carries", touches * 0.04);
    push("dribbles_attempted", dribbles_attempted);
    push("dribbles_completed", dribbles_attempted * (0.5 + (seed % 5.0) * 0.03));
    push("dispossessed", 12.0 + seed % 11.0);
    push("miscontrols", 14.0 + seed % 9.0);
    push("fouls_committed", 11.0 + seed % 13.0);
    push("fouls_drawn", 13.0 + seed % 10.0);
    push("yellow_cards", seed % 5.0);
    push("red_cards", 0.0);
    push("saves", saves);
    push("shots_on_target_against", shots_on_target_against);
    push("goals_conceded", if role == Role::Gk { 28.0 + seed } else { 0.0 });
    push("clean_sheets", if role == Role::Gk { 9.0 + seed % 4.0 } else { 0.0 });
    push("penalties_faced", if role == Role::Gk { 5.0 } else { 0.0 });
    push("penalties_saved", if role == Role::Gk { 1.0 + seed % 2.0 } else { 0.0 });
    push("sweeper_actions", if role == Role::Gk { 20.0 + seed } else { 0.0 });
    push("touches_def_third", touches * third_split.0);
    push("touches_mid_third", touches * third_split.1);
    push("touches_att_third", touches * third_split.2);
    push("touches_left", touches * (0.26 + (seed % 5.0) * 0.02));
    push("touches_centre", touches * 0.40);
    push("touches_right", touches * (0.24 + (seed % 4.0) * 0.02));
    push("touches_own_box", touches * own_box_share);
    push("touches_opp_box", touches * opp_box_share);
    push("passes_forward", passes_completed * fwd_share);
    push("passes_backward", passes_completed * back_share);
    push("passes_lateral", passes_completed * lat_share);
    push("avg_x", avg_x);
    push("avg_y", avg_y);
    push("std_x", std_x);
    push("std_y", std_y);
    push("positional_events", touches);

    out
}
