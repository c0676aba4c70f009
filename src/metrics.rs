use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::catalogue::{Catalogue, EvalGap, MetricDef, Unit};
use crate::cohort::{player_season_table, Cohort};
use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::store::{RowView, StoreGateway};

/// Threshold below which a standard deviation is treated as zero.
const STDEV_EPSILON: f64 = 1e-9;

/// A computed metric is either a number with its unit or a typed
/// insufficiency. Missing source data and empty denominators never leak
/// as NaN, infinity, or a silent zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum MetricValue {
    Value { value: f64, unit: Unit },
    Insufficient { reason: InsufficiencyReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsufficiencyReason {
    MinutesBelowThreshold,
    MissingData,
    ZeroDenominator,
}

impl MetricValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            MetricValue::Value { value, .. } => Some(*value),
            MetricValue::Insufficient { .. } => None,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, MetricValue::Insufficient { .. })
    }
}

/// Standardised metric vector for one player within one cohort. The
/// metric-id list the vector was built from travels with the values;
/// alignment between peers is by construction, not convention.
#[derive(Debug, Clone)]
pub struct StatsVector {
    pub metric_ids: Vec<String>,
    pub values: Vec<f64>,
    /// Indices whose underlying value was insufficient.
    pub missing: Vec<usize>,
}

impl StatsVector {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Standardised vectors for every cohort member, built against shared
/// per-metric distributions so any two members are directly comparable.
pub struct CohortVectors {
    pub metric_ids: Vec<String>,
    pub vectors: BTreeMap<i64, StatsVector>,
}

pub struct PercentileTable {
    pub metric_id: String,
    pub cohort_size: usize,
    pub by_player: BTreeMap<i64, f64>,
}

pub struct MetricEngine<'a> {
    store: &'a StoreGateway,
    catalogue: &'a Catalogue,
    config: &'a CoreConfig,
}

impl<'a> MetricEngine<'a> {
    pub fn new(store: &'a StoreGateway, catalogue: &'a Catalogue, config: &'a CoreConfig) -> Self {
        Self {
            store,
            catalogue,
            config,
        }
    }

    /// Evaluate the named metrics for one player-season. Keys in the
    /// result are the canonical metric ids.
    pub fn values(
        &self,
        player_id: i64,
        season: &str,
        metric_ids: &[String],
    ) -> Result<BTreeMap<String, MetricValue>> {
        let metrics = self.resolve_all(metric_ids)?;

        let table = player_season_table(self.store, player_id, season)?;
        let Some(row) = table.rows().next() else {
            return Err(CoreError::NoSeasonData {
                player: player_id,
                season: season.to_string(),
            });
        };

        let minutes = row.f64("minutes").unwrap_or(0.0);
        let mut out = BTreeMap::new();
        for metric in metrics {
            out.insert(metric.id.clone(), self.value_from_row(metric, &row, minutes));
        }
        Ok(out)
    }

    /// Same metrics across several seasons; seasons without data are
    /// omitted rather than erroring the whole request.
    pub fn values_for_seasons(
        &self,
        player_id: i64,
        seasons: &[String],
        metric_ids: &[String],
    ) -> Result<BTreeMap<String, BTreeMap<String, MetricValue>>> {
        let mut out = BTreeMap::new();
        for season in seasons {
            match self.values(player_id, season, metric_ids) {
                Ok(values) => {
                    out.insert(season.clone(), values);
                }
                Err(CoreError::NoSeasonData { .. }) => {
                    debug!(player_id, season = %season, "no data for season, skipping");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }

    /// Evaluate one metric against an already-fetched season row.
    pub fn value_from_row(
        &self,
        metric: &MetricDef,
        row: &RowView<'_>,
        minutes: f64,
    ) -> MetricValue {
        if metric.formula.requires_minutes() {
            let required = self.catalogue.min_minutes_for(metric, self.config);
            if minutes < required as f64 {
                return MetricValue::Insufficient {
                    reason: InsufficiencyReason::MinutesBelowThreshold,
                };
            }
        }
        match metric.formula.eval(row, minutes) {
            Ok(value) => MetricValue::Value {
                value,
                unit: metric.unit,
            },
            Err(EvalGap::MissingData) => MetricValue::Insufficient {
                reason: InsufficiencyReason::MissingData,
            },
            Err(EvalGap::ZeroDenominator) => MetricValue::Insufficient {
                reason: InsufficiencyReason::ZeroDenominator,
            },
        }
    }

    /// Percentile of each cohort member among the cohort itself, with
    /// average-rank tie handling. Members without a valid value drop out
    /// of the distribution and the result map.
    pub fn percentiles(&self, metric_id: &str, cohort: &Cohort) -> Result<PercentileTable> {
        let metric = self
            .catalogue
            .resolve(metric_id)
            .ok_or_else(|| CoreError::UnknownMetric(metric_id.to_string()))?;

        let mut observed: Vec<(i64, f64)> = Vec::with_capacity(cohort.len());
        for member in cohort.members() {
            let row = cohort.row(member);
            if let Some(value) = self.value_from_row(metric, &row, member.minutes).value() {
                observed.push((member.player_id, value));
            }
        }

        let n = observed.len();
        if n < self.config.min_cohort_size {
            return Err(CoreError::CohortTooSmall {
                size: n,
                required: self.config.min_cohort_size,
            });
        }

        let by_player = percentile_ranks(&observed, metric.higher_is_better);
        Ok(PercentileTable {
            metric_id: metric.id.clone(),
            cohort_size: n,
            by_player,
        })
    }

    /// Standardised vectors for the whole cohort over an ordered metric
    /// set, with optional per-dimension weights (preset weights). The
    /// same distributions standardise every member, so the vectors are
    /// mutually comparable by construction.
    pub fn cohort_vectors(
        &self,
        cohort: &Cohort,
        weighted_metrics: &[(String, f64)],
    ) -> Result<CohortVectors> {
        if cohort.len() < self.config.min_cohort_size {
            return Err(CoreError::CohortTooSmall {
                size: cohort.len(),
                required: self.config.min_cohort_size,
            });
        }

        let mut metrics = Vec::with_capacity(weighted_metrics.len());
        for (id, weight) in weighted_metrics {
            let metric = self
                .catalogue
                .resolve(id)
                .ok_or_else(|| CoreError::UnknownMetric(id.clone()))?;
            metrics.push((metric, *weight));
        }

        // Raw values per member per dimension, then shared distributions.
        let mut raw: BTreeMap<i64, Vec<Option<f64>>> = BTreeMap::new();
        for member in cohort.members() {
            let row = cohort.row(member);
            let values = metrics
                .iter()
                .map(|(metric, _)| self.value_from_row(metric, &row, member.minutes).value())
                .collect();
            raw.insert(member.player_id, values);
        }

        let dims: Vec<Distribution> = (0..metrics.len())
            .map(|dim| {
                let values: Vec<f64> = raw.values().filter_map(|vals| vals[dim]).collect();
                Distribution::from_values(&values)
            })
            .collect();

        let clip = self.config.zscore_clip;
        let metric_ids: Vec<String> = metrics.iter().map(|(m, _)| m.id.clone()).collect();
        let mut vectors = BTreeMap::new();
        for (player_id, values) in raw {
            let mut out = Vec::with_capacity(values.len());
            let mut missing = Vec::new();
            for (dim, value) in values.into_iter().enumerate() {
                match value {
                    Some(v) => {
                        let z = dims[dim].zscore(v).clamp(-clip, clip);
                        out.push(z * metrics[dim].1);
                    }
                    None => {
                        missing.push(dim);
                        out.push(0.0);
                    }
                }
            }
            vectors.insert(
                player_id,
                StatsVector {
                    metric_ids: metric_ids.clone(),
                    values: out,
                    missing,
                },
            );
        }

        debug!(
            members = vectors.len(),
            dims = metric_ids.len(),
            "cohort vectors built"
        );
        Ok(CohortVectors {
            metric_ids,
            vectors,
        })
    }

    /// One player's standardised vector within a cohort.
    pub fn stats_vector(
        &self,
        player_id: i64,
        cohort: &Cohort,
        weighted_metrics: &[(String, f64)],
    ) -> Result<StatsVector> {
        let mut vectors = self.cohort_vectors(cohort, weighted_metrics)?;
        vectors
            .vectors
            .remove(&player_id)
            .ok_or_else(|| CoreError::NoSeasonData {
                player: player_id,
                season: cohort.descriptor.season.clone(),
            })
    }

    fn resolve_all(&self, metric_ids: &[String]) -> Result<Vec<&MetricDef>> {
        let mut out = Vec::with_capacity(metric_ids.len());
        for id in metric_ids {
            out.push(
                self.catalogue
                    .resolve(id)
                    .ok_or_else(|| CoreError::UnknownMetric(id.clone()))?,
            );
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy)]
struct Distribution {
    mean: f64,
    std: f64,
}

impl Distribution {
    /// Population standard deviation: the cohort is the full reference
    /// universe, not a sample.
    fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                mean: 0.0,
                std: 0.0,
            };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std: variance.sqrt(),
        }
    }

    fn zscore(&self, value: f64) -> f64 {
        if self.std < STDEV_EPSILON {
            return 0.0;
        }
        (value - self.mean) / self.std
    }
}

/// Average-rank percentiles on a fixed direction: the best value maps to
/// 100, the worst to 0, ties share the mean of their rank range.
fn percentile_ranks(observed: &[(i64, f64)], higher_is_better: bool) -> BTreeMap<i64, f64> {
    let n = observed.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        let (va, vb) = (observed[a].1, observed[b].1);
        let cmp = va.total_cmp(&vb);
        if higher_is_better {
            cmp
        } else {
            cmp.reverse()
        }
    });

    let mut ranks = vec![0.0_f64; n];
    let mut idx = 0;
    while idx < n {
        let mut end = idx + 1;
        while end < n && observed[order[end]].1 == observed[order[idx]].1 {
            end += 1;
        }
        // 1-based ranks idx+1 ..= end averaged over the tie group.
        let avg_rank = (idx + 1 + end) as f64 / 2.0;
        for &pos in &order[idx..end] {
            ranks[pos] = avg_rank;
        }
        idx = end;
    }

    let mut out = BTreeMap::new();
    for (pos, (player_id, _)) in observed.iter().enumerate() {
        let pct = if n == 1 {
            50.0
        } else {
            (ranks[pos] - 1.0) / (n as f64 - 1.0) * 100.0
        };
        out.insert(*player_id, pct);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_span_zero_to_hundred() {
        let observed: Vec<(i64, f64)> = (0..5).map(|i| (i as i64, i as f64)).collect();
        let ranks = percentile_ranks(&observed, true);
        assert_eq!(ranks[&0], 0.0);
        assert_eq!(ranks[&4], 100.0);
        assert_eq!(ranks[&2], 50.0);
    }

    #[test]
    fn lower_is_better_inverts_the_ordering() {
        let observed: Vec<(i64, f64)> = vec![(1, 0.1), (2, 0.5), (3, 0.9)];
        let ranks = percentile_ranks(&observed, false);
        assert_eq!(ranks[&1], 100.0);
        assert_eq!(ranks[&3], 0.0);
    }

    #[test]
    fn ties_share_the_average_rank() {
        let observed: Vec<(i64, f64)> = vec![(1, 1.0), (2, 2.0), (3, 2.0), (4, 3.0)];
        let ranks = percentile_ranks(&observed, true);
        // Tied players occupy ranks 2 and 3; the average rank 2.5 maps to
        // (2.5 - 1) / 3 * 100 = 50.
        assert_eq!(ranks[&2], 50.0);
        assert_eq!(ranks[&3], 50.0);
        assert_eq!(ranks[&1], 0.0);
        assert_eq!(ranks[&4], 100.0);
    }

    #[test]
    fn zero_spread_yields_zero_zscores() {
        let dist = Distribution::from_values(&[2.0, 2.0, 2.0]);
        assert_eq!(dist.zscore(2.0), 0.0);
        assert_eq!(dist.zscore(5.0), 0.0);
    }

    #[test]
    fn population_std_matches_hand_computation() {
        let dist = Distribution::from_values(&[1.0, 2.0, 3.0, 4.0]);
        assert!((dist.mean - 2.5).abs() < 1e-12);
        assert!((dist.std - (1.25_f64).sqrt()).abs() < 1e-12);
    }
}
