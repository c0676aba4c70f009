mod common;

use std::collections::BTreeSet;

use scout_core::{CoreError, MetricSelection, QueryKind, StructuredQuery, Weights};

fn leaderboard(metrics: MetricSelection) -> StructuredQuery {
    StructuredQuery {
        kind: QueryKind::Leaderboard,
        reference: None,
        players: Vec::new(),
        season: "2024-25".to_string(),
        cohort: Default::default(),
        metrics,
        weights: Weights::default(),
        limit: 10,
    }
}

#[test]
fn shipped_catalogue_passes_the_self_check() {
    let store_path = common::seed_store();
    let core = common::open_core(&store_path);
    // Opening already ran the self-check; run it again explicitly.
    core.catalogue()
        .self_check(core.store().schema())
        .expect("shipped catalogue must match the store schema");
}

#[test]
fn every_formula_column_exists_in_the_store() {
    let store_path = common::seed_store();
    let core = common::open_core(&store_path);
    let schema = core.store().schema();

    for metric in core.catalogue().metrics() {
        let mut columns = BTreeSet::new();
        metric.formula.columns(&mut columns);
        assert!(!columns.is_empty(), "{} reads no columns", metric.id);
        for column in columns {
            assert!(
                schema.has_column("player_season_stats", &column),
                "metric {} references unknown column {column}",
                metric.id
            );
        }
    }
}

#[test]
fn every_preset_metric_is_defined_with_positive_weight() {
    let store_path = common::seed_store();
    let core = common::open_core(&store_path);
    for (name, preset) in core.catalogue().presets() {
        assert!(!preset.metrics.is_empty(), "preset {name} is empty");
        for pm in &preset.metrics {
            assert!(
                core.catalogue().is_known(&pm.id),
                "preset {name} names unknown metric {}",
                pm.id
            );
            assert!(pm.weight > 0.0);
        }
    }
}

#[test]
fn unknown_metric_is_refused_not_guessed() {
    let store_path = common::seed_store();
    let core = common::open_core(&store_path);

    assert!(core.catalogue().resolve("clutch_factor").is_none());
    assert!(!core.catalogue().is_known("clutch_factor"));

    let err = core
        .catalogue()
        .validate_query(&leaderboard(MetricSelection::Metrics(vec![
            "clutch_factor".to_string(),
        ])))
        .unwrap_err();
    match err {
        CoreError::UnknownMetric(name) => assert_eq!(name, "clutch_factor"),
        other => panic!("expected UnknownMetric, got {other}"),
    }
}

#[test]
fn aliases_resolve_to_canonical_ids() {
    let store_path = common::seed_store();
    let core = common::open_core(&store_path);
    let catalogue = core.catalogue();

    assert_eq!(catalogue.resolve("xG").unwrap().id, "xg_per90");
    assert_eq!(
        catalogue.resolve("pass accuracy").unwrap().id,
        "pass_completion_pct"
    );
    assert_eq!(
        catalogue.resolve("Save Percentage").unwrap().id,
        "save_pct"
    );
}

#[test]
fn catalogue_referencing_missing_columns_fails_startup() {
    let store_path = common::seed_store();

    let bogus = r#"{
        "version": "0.0.1",
        "metrics": [{
            "id": "phantom_per90",
            "name": "Phantom per 90",
            "category": "advanced",
            "formula": {"per90": {"col": "phantom_column"}},
            "unit": "per90",
            "scopes": ["MF"]
        }],
        "presets": {
            "mid_profile": {
                "name": "Mid profile",
                "positions": ["MF"],
                "metrics": [{"id": "phantom_per90", "weight": 1.0}]
            }
        }
    }"#;
    let mut path = std::env::temp_dir();
    path.push(format!("scout_core_bogus_catalogue_{}.json", std::process::id()));
    std::fs::write(&path, bogus).unwrap();

    let err = scout_core::ScoutCore::open(&store_path, &path, Default::default()).unwrap_err();
    match err {
        CoreError::CatalogueInvalid { reasons } => {
            assert!(reasons.iter().any(|r| r.contains("phantom_column")));
        }
        other => panic!("expected CatalogueInvalid, got {other}"),
    }
}

#[test]
fn preset_weights_and_positions_drive_defaults() {
    let store_path = common::seed_store();
    let core = common::open_core(&store_path);
    let catalogue = core.catalogue();

    let (name, preset) = catalogue
        .preset_for_position(scout_core::position::PositionCode::St)
        .unwrap();
    assert_eq!(name, "striker_profile");
    assert!(preset
        .metrics
        .iter()
        .any(|pm| pm.id == "non_penalty_goals_per90"));

    let resolved = catalogue
        .resolve_selection(&MetricSelection::Preset("striker_profile".into()), None)
        .unwrap();
    assert_eq!(resolved.metrics.len(), preset.metrics.len());
    assert_eq!(
        resolved.selection,
        MetricSelection::Preset("striker_profile".to_string())
    );
}

#[test]
fn validate_query_collects_every_reason() {
    let store_path = common::seed_store();
    let core = common::open_core(&store_path);

    let mut query = leaderboard(MetricSelection::Metrics(vec![
        "clutch_factor".to_string(),
        "grit_index".to_string(),
    ]));
    query.limit = 0;

    match core.catalogue().validate_query(&query).unwrap_err() {
        CoreError::InvalidQuery { reasons } => {
            assert_eq!(reasons.len(), 3);
            assert!(reasons.iter().any(|r| r.contains("clutch_factor")));
            assert!(reasons.iter().any(|r| r.contains("grit_index")));
            assert!(reasons.iter().any(|r| r.contains("limit")));
        }
        other => panic!("expected InvalidQuery, got {other}"),
    }
}
