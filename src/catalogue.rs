use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::position::{PositionCode, PositionGroup};
use crate::query::{
    MetricSelection, QueryKind, StructuredQuery, MAX_COMPARISON_PLAYERS, MAX_LIMIT,
};
use crate::store::{RowView, SchemaDescriptor};

/// The table every formula reads from.
const STATS_TABLE: &str = "player_season_stats";

/// The only place in the system that defines what a metric is. Loaded
/// once from the catalogue file at startup, validated against the store
/// schema, and immutable thereafter. A name that does not resolve here
/// does not exist.
#[derive(Debug)]
pub struct Catalogue {
    version: String,
    metrics: Vec<MetricDef>,
    by_id: HashMap<String, usize>,
    alias_index: HashMap<String, String>,
    presets: BTreeMap<String, Preset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricDef {
    pub id: String,
    pub name: String,
    pub category: Category,
    pub formula: Formula,
    pub unit: Unit,
    #[serde(default = "default_true")]
    pub higher_is_better: bool,
    pub scopes: Vec<PositionGroup>,
    /// Overrides the configured minutes threshold for this metric.
    #[serde(default)]
    pub min_minutes: Option<u32>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Shooting,
    Passing,
    Defending,
    Possession,
    Discipline,
    Goalkeeper,
    Advanced,
}

/// Declared output unit; percent is 0-100, fraction is 0-1, and the two
/// are never interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Per90,
    Percent,
    Fraction,
    Count,
    Delta,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Preset {
    pub name: String,
    pub metrics: Vec<PresetMetric>,
    /// Position codes this preset is the default profile for.
    pub positions: Vec<PositionCode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresetMetric {
    pub id: String,
    pub weight: f64,
}

// ---------------------------------------------------------------------------
// Formula AST
// ---------------------------------------------------------------------------

/// Formulas are data in the catalogue file, expressed over named
/// player_season_stats columns and composable:
/// `{"per90": {"diff": [{"col": "goals"}, {"col": "penalty_goals"}]}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Formula {
    Col(String),
    Per90(Box<Formula>),
    Pct(Box<Formula>, Box<Formula>),
    Ratio(Box<Formula>, Box<Formula>),
    Sum(Vec<Formula>),
    Diff(Box<Formula>, Box<Formula>),
}

/// Why a formula produced no value. Division by zero and missing source
/// data yield a gap, never NaN or infinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalGap {
    MissingData,
    ZeroDenominator,
}

impl Formula {
    pub fn eval(&self, row: &RowView<'_>, minutes: f64) -> std::result::Result<f64, EvalGap> {
        match self {
            Formula::Col(name) => row.f64(name).ok_or(EvalGap::MissingData),
            Formula::Per90(inner) => {
                if minutes <= 0.0 {
                    return Err(EvalGap::ZeroDenominator);
                }
                Ok(inner.eval(row, minutes)? * 90.0 / minutes)
            }
            Formula::Pct(num, den) => {
                let d = den.eval(row, minutes)?;
                if d <= 0.0 {
                    return Err(EvalGap::ZeroDenominator);
                }
                Ok(num.eval(row, minutes)? / d * 100.0)
            }
            Formula::Ratio(num, den) => {
                let d = den.eval(row, minutes)?;
                if d.abs() < f64::EPSILON {
                    return Err(EvalGap::ZeroDenominator);
                }
                Ok(num.eval(row, minutes)? / d)
            }
            Formula::Sum(parts) => {
                let mut total = 0.0;
                for part in parts {
                    total += part.eval(row, minutes)?;
                }
                Ok(total)
            }
            Formula::Diff(a, b) => Ok(a.eval(row, minutes)? - b.eval(row, minutes)?),
        }
    }

    pub fn columns(&self, out: &mut BTreeSet<String>) {
        match self {
            Formula::Col(name) => {
                out.insert(name.clone());
            }
            Formula::Per90(inner) => inner.columns(out),
            Formula::Pct(a, b) | Formula::Ratio(a, b) | Formula::Diff(a, b) => {
                a.columns(out);
                b.columns(out);
            }
            Formula::Sum(parts) => {
                for part in parts {
                    part.columns(out);
                }
            }
        }
    }

    /// True when the value is rate-normalised and therefore only valid
    /// above the minutes threshold.
    pub fn requires_minutes(&self) -> bool {
        match self {
            Formula::Per90(_) => true,
            Formula::Col(_) => false,
            Formula::Pct(a, b) | Formula::Ratio(a, b) | Formula::Diff(a, b) => {
                a.requires_minutes() || b.requires_minutes()
            }
            Formula::Sum(parts) => parts.iter().any(|p| p.requires_minutes()),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading and the startup self-check
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CatalogueFile {
    version: String,
    metrics: Vec<MetricDef>,
    presets: BTreeMap<String, Preset>,
}

impl Catalogue {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|err| CoreError::CatalogueInvalid {
            reasons: vec![format!("read {}: {err}", path.display())],
        })?;
        let file: CatalogueFile =
            serde_json::from_str(&raw).map_err(|err| CoreError::CatalogueInvalid {
                reasons: vec![format!("parse catalogue: {err}")],
            })?;
        Self::from_file(file)
    }

    fn from_file(file: CatalogueFile) -> Result<Self> {
        let mut reasons = Vec::new();
        let mut by_id = HashMap::new();
        let mut alias_index: HashMap<String, String> = HashMap::new();

        for (idx, metric) in file.metrics.iter().enumerate() {
            if by_id.insert(metric.id.clone(), idx).is_some() {
                reasons.push(format!("duplicate metric id '{}'", metric.id));
            }
            for key in std::iter::once(metric.id.as_str())
                .chain(std::iter::once(metric.name.as_str()))
                .chain(metric.aliases.iter().map(|a| a.as_str()))
            {
                let lowered = key.trim().to_lowercase();
                if let Some(existing) = alias_index.get(&lowered) {
                    if existing != &metric.id {
                        reasons.push(format!(
                            "alias '{key}' maps to both '{existing}' and '{}'",
                            metric.id
                        ));
                    }
                } else {
                    alias_index.insert(lowered, metric.id.clone());
                }
            }
            if metric.scopes.is_empty() {
                reasons.push(format!("metric '{}' has no position scopes", metric.id));
            }
        }

        if !reasons.is_empty() {
            return Err(CoreError::CatalogueInvalid { reasons });
        }

        debug!(
            version = %file.version,
            metrics = file.metrics.len(),
            presets = file.presets.len(),
            "catalogue loaded"
        );

        Ok(Self {
            version: file.version,
            metrics: file.metrics,
            by_id,
            alias_index,
            presets: file.presets,
        })
    }

    /// Startup self-check: every column referenced by every formula must
    /// exist in the store schema, every preset must refer to defined
    /// metrics, and every preset weight must be usable. Failure is fatal.
    pub fn self_check(&self, schema: &SchemaDescriptor) -> Result<()> {
        let mut reasons = Vec::new();

        for metric in &self.metrics {
            let mut cols = BTreeSet::new();
            metric.formula.columns(&mut cols);
            for col in cols {
                if !schema.has_column(STATS_TABLE, &col) {
                    reasons.push(format!(
                        "metric '{}' references unknown column '{col}'",
                        metric.id
                    ));
                }
            }
        }

        for (key, preset) in &self.presets {
            if preset.metrics.is_empty() {
                reasons.push(format!("preset '{key}' lists no metrics"));
            }
            for pm in &preset.metrics {
                if !self.is_known(&pm.id) {
                    reasons.push(format!(
                        "preset '{key}' references unknown metric '{}'",
                        pm.id
                    ));
                }
                if !pm.weight.is_finite() || pm.weight <= 0.0 {
                    reasons.push(format!(
                        "preset '{key}' has non-positive weight for '{}'",
                        pm.id
                    ));
                }
            }
            if preset.positions.is_empty() {
                reasons.push(format!("preset '{key}' covers no positions"));
            }
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(CoreError::CatalogueInvalid { reasons })
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    // -----------------------------------------------------------------------
    // Validator contract
    // -----------------------------------------------------------------------

    pub fn is_known(&self, metric_id: &str) -> bool {
        self.by_id.contains_key(metric_id)
    }

    /// Case-insensitive resolution over ids, display names and aliases.
    /// Never falls back to fuzzy guessing: an unresolvable name is `None`
    /// and callers must treat it as an error.
    pub fn resolve(&self, alias_or_name: &str) -> Option<&MetricDef> {
        let key = alias_or_name.trim().to_lowercase();
        let id = self.alias_index.get(&key)?;
        self.metric(id)
    }

    pub fn metric(&self, metric_id: &str) -> Option<&MetricDef> {
        self.by_id.get(metric_id).map(|idx| &self.metrics[*idx])
    }

    pub fn metrics(&self) -> impl Iterator<Item = &MetricDef> {
        self.metrics.iter()
    }

    pub fn metrics_in_category(&self, category: Category) -> Vec<&MetricDef> {
        self.metrics
            .iter()
            .filter(|m| m.category == category)
            .collect()
    }

    pub fn preset(&self, name: &str) -> Option<&Preset> {
        self.presets.get(name.trim().to_lowercase().as_str())
    }

    pub fn presets(&self) -> impl Iterator<Item = (&str, &Preset)> {
        self.presets.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The preset a position defaults to when a query names no metrics.
    pub fn preset_for_position(&self, position: PositionCode) -> Option<(&str, &Preset)> {
        self.presets
            .iter()
            .find(|(_, preset)| preset.positions.contains(&position))
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Effective minutes threshold for one metric.
    pub fn min_minutes_for(&self, metric: &MetricDef, config: &CoreConfig) -> u32 {
        metric.min_minutes.unwrap_or(config.min_minutes_default)
    }

    /// Unit-aware display formatting for consumers.
    pub fn format_value(&self, metric: &MetricDef, value: f64) -> String {
        match metric.unit {
            Unit::Per90 => format!("{value:.2}"),
            Unit::Percent => format!("{value:.1}%"),
            Unit::Fraction => format!("{value:.3}"),
            Unit::Count => format!("{value:.0}"),
            Unit::Delta => format!("{value:+.2}"),
        }
    }

    /// Full structural validation of a query against the catalogue.
    pub fn validate_query(&self, query: &StructuredQuery) -> Result<()> {
        let mut issues: Vec<QueryIssue> = Vec::new();

        if query.limit < 1 || query.limit > MAX_LIMIT {
            issues.push(QueryIssue::InvalidLimit(query.limit as i64));
        }

        if query.kind == QueryKind::Similarity {
            if query.reference.is_none() {
                issues.push(QueryIssue::Other(
                    "similarity query requires a reference player".to_string(),
                ));
            }
            let w = &query.weights;
            if !w.role.is_finite() || !w.stats.is_finite() {
                issues.push(QueryIssue::InvalidWeight("weights must be finite".into()));
            } else if w.role < 0.0 || w.stats < 0.0 {
                issues.push(QueryIssue::InvalidWeight(
                    "weights must be non-negative".into(),
                ));
            } else if w.sum() <= 0.0 {
                issues.push(QueryIssue::InvalidWeight(
                    "weights must sum to a positive number".into(),
                ));
            }
        }

        if query.kind == QueryKind::Comparison
            && (query.players.len() < 2 || query.players.len() > MAX_COMPARISON_PLAYERS)
        {
            issues.push(QueryIssue::Other(format!(
                "comparison requires 2..={MAX_COMPARISON_PLAYERS} players, got {}",
                query.players.len()
            )));
        }

        match &query.metrics {
            MetricSelection::Preset(name) => {
                if self.preset(name).is_none() {
                    issues.push(QueryIssue::Other(format!("unknown preset '{name}'")));
                }
            }
            MetricSelection::Metrics(ids) => {
                if ids.is_empty() {
                    issues.push(QueryIssue::Other("empty metric list".to_string()));
                }
                for id in ids {
                    match self.resolve(id) {
                        None => issues.push(QueryIssue::UnknownMetric(id.clone())),
                        Some(metric) => {
                            for position in &query.cohort.positions {
                                if !position.in_scope(&metric.scopes) {
                                    issues.push(QueryIssue::IncompatibleMetricForPosition {
                                        metric: metric.id.clone(),
                                        position: position.as_str().to_string(),
                                    });
                                }
                            }
                        }
                    }
                }
            }
            MetricSelection::PositionDefault => {}
        }

        issues_to_result(issues)
    }

    /// Expand a metric selection into an ordered (id, weight) list plus
    /// the canonical selection that was actually applied (so an executed
    /// query re-runs identically). `position_hint` drives the default
    /// preset when the selection is `PositionDefault`.
    pub fn resolve_selection(
        &self,
        selection: &MetricSelection,
        position_hint: Option<PositionCode>,
    ) -> Result<ResolvedSelection> {
        match selection {
            MetricSelection::Preset(name) => {
                let key = name.trim().to_lowercase();
                let preset = self.preset(&key).ok_or_else(|| CoreError::InvalidQuery {
                    reasons: vec![format!("unknown preset '{name}'")],
                })?;
                Ok(ResolvedSelection {
                    selection: MetricSelection::Preset(key),
                    metrics: preset
                        .metrics
                        .iter()
                        .map(|pm| (pm.id.clone(), pm.weight))
                        .collect(),
                })
            }
            MetricSelection::Metrics(ids) => {
                let mut out = Vec::with_capacity(ids.len());
                for id in ids {
                    let metric = self
                        .resolve(id)
                        .ok_or_else(|| CoreError::UnknownMetric(id.clone()))?;
                    out.push((metric.id.clone(), 1.0));
                }
                Ok(ResolvedSelection {
                    selection: MetricSelection::Metrics(
                        out.iter().map(|(id, _)| id.clone()).collect(),
                    ),
                    metrics: out,
                })
            }
            MetricSelection::PositionDefault => {
                let position = position_hint.unwrap_or(PositionCode::Mf);
                let (name, preset) =
                    self.preset_for_position(position)
                        .ok_or_else(|| CoreError::InvalidQuery {
                            reasons: vec![format!(
                                "no default preset covers position {}",
                                position.as_str()
                            )],
                        })?;
                Ok(ResolvedSelection {
                    selection: MetricSelection::Preset(name.to_string()),
                    metrics: preset
                        .metrics
                        .iter()
                        .map(|pm| (pm.id.clone(), pm.weight))
                        .collect(),
                })
            }
        }
    }
}

/// A metric selection after resolution: the canonical form to record on
/// the executed query, and the ordered weighted metric list to run with.
#[derive(Debug, Clone)]
pub struct ResolvedSelection {
    pub selection: MetricSelection,
    pub metrics: Vec<(String, f64)>,
}

enum QueryIssue {
    UnknownMetric(String),
    IncompatibleMetricForPosition { metric: String, position: String },
    InvalidWeight(String),
    InvalidLimit(i64),
    Other(String),
}

impl QueryIssue {
    fn describe(&self) -> String {
        match self {
            QueryIssue::UnknownMetric(id) => format!("unknown metric: {id}"),
            QueryIssue::IncompatibleMetricForPosition { metric, position } => {
                format!("metric '{metric}' is not defined for position {position}")
            }
            QueryIssue::InvalidWeight(msg) => format!("invalid weight: {msg}"),
            QueryIssue::InvalidLimit(limit) => format!("invalid limit {limit}"),
            QueryIssue::Other(msg) => msg.clone(),
        }
    }

    fn into_error(self) -> CoreError {
        match self {
            QueryIssue::UnknownMetric(id) => CoreError::UnknownMetric(id),
            QueryIssue::IncompatibleMetricForPosition { metric, position } => {
                CoreError::IncompatibleMetricForPosition { metric, position }
            }
            QueryIssue::InvalidWeight(msg) => CoreError::InvalidWeight(msg),
            QueryIssue::InvalidLimit(limit) => CoreError::InvalidLimit(limit),
            QueryIssue::Other(msg) => CoreError::InvalidQuery { reasons: vec![msg] },
        }
    }
}

fn issues_to_result(mut issues: Vec<QueryIssue>) -> Result<()> {
    match issues.len() {
        0 => Ok(()),
        1 => Err(issues.remove(0).into_error()),
        _ => Err(CoreError::InvalidQuery {
            reasons: issues.iter().map(|i| i.describe()).collect(),
        }),
    }
}
