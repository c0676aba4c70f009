use serde::{Deserialize, Serialize};

use crate::position::PositionCode;

/// The one record every entry point produces and the executor consumes.
/// Built either by the natural-language parser or directly by a caller;
/// both paths go through the same catalogue validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredQuery {
    pub kind: QueryKind,
    /// Reference player for similarity queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<PlayerRef>,
    /// Players for comparison queries, in presentation order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub players: Vec<PlayerRef>,
    /// Season label, e.g. "2024-25".
    pub season: String,
    #[serde(default)]
    pub cohort: CohortFilters,
    #[serde(default)]
    pub metrics: MetricSelection,
    #[serde(default)]
    pub weights: Weights,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

pub const MAX_LIMIT: usize = 500;
pub const MAX_COMPARISON_PLAYERS: usize = 8;

fn default_limit() -> usize {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    Similarity,
    Leaderboard,
    Comparison,
    Filter,
}

impl QueryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryKind::Similarity => "similarity",
            QueryKind::Leaderboard => "leaderboard",
            QueryKind::Comparison => "comparison",
            QueryKind::Filter => "filter",
        }
    }
}

/// Players are referenced by opaque id from API callers and by display
/// name from the parser; executor resolution turns names into ids before
/// any engine runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlayerRef {
    Id(i64),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CohortFilters {
    /// League names; empty means all leagues in the store.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub leagues: Vec<String>,
    /// Position filter values; group codes expand to their members.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub positions: Vec<PositionCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_max: Option<u32>,
    /// Overrides `min_minutes_default` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_minutes: Option<u32>,
}

/// Which metrics a query runs over. `PositionDefault` resolves to the
/// preset for the reference player's (or filter's) position at execution
/// time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSelection {
    Preset(String),
    Metrics(Vec<String>),
    #[default]
    PositionDefault,
}

impl MetricSelection {
    pub fn is_default(&self) -> bool {
        matches!(self, MetricSelection::PositionDefault)
    }
}

/// Similarity component weights. Validated as finite and non-negative
/// with a positive sum, then normalised to sum to 1 inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub role: f64,
    pub stats: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            role: 0.6,
            stats: 0.4,
        }
    }
}

impl Weights {
    pub fn sum(&self) -> f64 {
        self.role + self.stats
    }

    /// Normalised copy summing to 1. Callers must have validated first.
    pub fn normalised(&self) -> Weights {
        let total = self.sum();
        Weights {
            role: self.role / total,
            stats: self.stats / total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let query = StructuredQuery {
            kind: QueryKind::Similarity,
            reference: Some(PlayerRef::Id(42)),
            players: Vec::new(),
            season: "2024-25".to_string(),
            cohort: CohortFilters {
                leagues: vec!["Premier League".to_string()],
                positions: vec![PositionCode::St],
                age_min: None,
                age_max: Some(25),
                min_minutes: Some(900),
            },
            metrics: MetricSelection::Preset("striker_profile".to_string()),
            weights: Weights::default(),
            limit: 10,
        };
        let json = serde_json::to_string(&query).unwrap();
        let back: StructuredQuery = serde_json::from_str(&json).unwrap();
        assert_eq!(query, back);
    }

    #[test]
    fn player_ref_accepts_both_forms() {
        let by_id: PlayerRef = serde_json::from_str("42").unwrap();
        assert_eq!(by_id, PlayerRef::Id(42));
        let by_name: PlayerRef = serde_json::from_str("\"Erling Haaland\"").unwrap();
        assert_eq!(by_name, PlayerRef::Name("Erling Haaland".to_string()));
    }

    #[test]
    fn limit_defaults_when_absent() {
        let raw = r#"{"kind": "leaderboard", "season": "2024-25"}"#;
        let query: StructuredQuery = serde_json::from_str(raw).unwrap();
        assert_eq!(query.limit, 10);
        assert!(query.metrics.is_default());
    }

    #[test]
    fn weights_normalise_to_unit_sum() {
        let w = Weights {
            role: 3.0,
            stats: 1.0,
        };
        let n = w.normalised();
        assert!((n.role - 0.75).abs() < 1e-12);
        assert!((n.sum() - 1.0).abs() < 1e-12);
    }
}
