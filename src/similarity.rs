use serde::Serialize;
use tracing::debug;

use crate::catalogue::Catalogue;
use crate::cohort::{Cohort, CohortDescriptor};
use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::metrics::MetricEngine;
use crate::position::PositionCode;
use crate::query::Weights;
use crate::role::{RoleEngine, RoleVector};
use crate::store::StoreGateway;

const ATTRIBUTION_TOP_N: usize = 3;

/// Ranked similarity to a reference player-season:
/// `sim(R, C) = w_role * cos(role) + w_stats * cos(stats)`, cosines
/// clamped to [0, 1], weights normalised to sum to 1. The reference is a
/// member of its own cohort and ranks first with similarity 1.
pub struct SimilarityEngine<'a> {
    config: &'a CoreConfig,
    metrics: MetricEngine<'a>,
    roles: RoleEngine<'a>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarityRow {
    pub player_id: i64,
    pub name: String,
    pub position: PositionCode,
    pub total: f64,
    pub role_component: f64,
    pub stats_component: f64,
    /// Metrics where the candidate is closest to the reference, by
    /// contribution to the stats dot product.
    pub closest_metrics: Vec<String>,
    pub most_different_metrics: Vec<String>,
    /// Role-block contributions to the role cosine, largest first.
    pub role_blocks: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarityOutcome {
    pub rows: Vec<SimilarityRow>,
    pub cohort: CohortDescriptor,
    /// Weights actually applied, after normalisation.
    pub weights: Weights,
    pub skipped_role_insufficient: usize,
    pub skipped_stats_incomplete: usize,
}

/// Pairwise detail for two named players in the same cohort.
#[derive(Debug, Clone, Serialize)]
pub struct PairBreakdown {
    pub role_similarity: f64,
    pub stats_similarity: f64,
    pub total: f64,
    pub per_metric: Vec<MetricPair>,
    pub role_blocks: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricPair {
    pub metric_id: String,
    pub reference_z: f64,
    pub candidate_z: f64,
    pub contribution: f64,
}

impl<'a> SimilarityEngine<'a> {
    pub fn new(store: &'a StoreGateway, catalogue: &'a Catalogue, config: &'a CoreConfig) -> Self {
        Self {
            config,
            metrics: MetricEngine::new(store, catalogue, config),
            roles: RoleEngine::new(store, config),
        }
    }

    pub fn similar_to(
        &self,
        reference_id: i64,
        cohort: &Cohort,
        weighted_metrics: &[(String, f64)],
        weights: Weights,
        limit: usize,
    ) -> Result<SimilarityOutcome> {
        let weights = validate_weights(weights)?;

        let reference = cohort
            .member(reference_id)
            .ok_or_else(|| CoreError::NoSeasonData {
                player: reference_id,
                season: cohort.descriptor.season.clone(),
            })?;

        let (ref_role, ref_diag) = self
            .roles
            .vector_from_row(&cohort.row(reference), Some(reference.position));
        if !ref_diag.sufficient {
            return Err(CoreError::ReferenceRoleInsufficient {
                player: reference_id,
            });
        }

        let vectors = self.metrics.cohort_vectors(cohort, weighted_metrics)?;
        let ref_stats = vectors
            .vectors
            .get(&reference_id)
            .ok_or(CoreError::NoCandidates)?;
        if !ref_stats.is_complete() {
            let missing: Vec<&str> = ref_stats
                .missing
                .iter()
                .map(|idx| vectors.metric_ids[*idx].as_str())
                .collect();
            return Err(CoreError::InvalidQuery {
                reasons: vec![format!(
                    "reference player lacks values for: {}",
                    missing.join(", ")
                )],
            });
        }

        let mut skipped_role = 0usize;
        let mut skipped_stats = 0usize;
        let mut rows: Vec<SimilarityRow> = Vec::with_capacity(cohort.len());

        for member in cohort.members() {
            let (cand_role, cand_diag) = self
                .roles
                .vector_from_row(&cohort.row(member), Some(member.position));
            if !cand_diag.sufficient {
                skipped_role += 1;
                continue;
            }
            let Some(cand_stats) = vectors.vectors.get(&member.player_id) else {
                skipped_stats += 1;
                continue;
            };
            if !cand_stats.is_complete() {
                skipped_stats += 1;
                continue;
            }

            let role_cos = self.clamp(ref_role.cosine(&cand_role));
            let stats_cos = self.clamp(cosine(&ref_stats.values, &cand_stats.values));
            let total = weights.role * role_cos + weights.stats * stats_cos;

            let (closest, most_different) =
                attribute_metrics(&vectors.metric_ids, &ref_stats.values, &cand_stats.values);

            let mut role_blocks: Vec<(String, f64)> = ref_role
                .block_contributions(&cand_role)
                .into_iter()
                .map(|(name, share)| (name.to_string(), share))
                .collect();
            role_blocks.sort_by(|a, b| b.1.total_cmp(&a.1));

            rows.push(SimilarityRow {
                player_id: member.player_id,
                name: member.name.clone(),
                position: member.position,
                total,
                role_component: role_cos,
                stats_component: stats_cos,
                closest_metrics: closest,
                most_different_metrics: most_different,
                role_blocks,
            });
        }

        if rows.is_empty() {
            return Err(CoreError::NoCandidates);
        }

        // Deterministic order: similarity descending, then player id.
        rows.sort_by(|a, b| b.total.total_cmp(&a.total).then(a.player_id.cmp(&b.player_id)));
        rows.truncate(limit);

        debug!(
            reference = reference_id,
            candidates = rows.len(),
            skipped_role,
            skipped_stats,
            "similarity ranked"
        );

        Ok(SimilarityOutcome {
            rows,
            cohort: cohort.descriptor.clone(),
            weights,
            skipped_role_insufficient: skipped_role,
            skipped_stats_incomplete: skipped_stats,
        })
    }

    /// Detailed two-player comparison over the same machinery.
    pub fn breakdown(
        &self,
        reference_id: i64,
        candidate_id: i64,
        cohort: &Cohort,
        weighted_metrics: &[(String, f64)],
        weights: Weights,
    ) -> Result<PairBreakdown> {
        let weights = validate_weights(weights)?;

        let mut role_vectors: Vec<RoleVector> = Vec::with_capacity(2);
        for player_id in [reference_id, candidate_id] {
            let member = cohort
                .member(player_id)
                .ok_or_else(|| CoreError::NoSeasonData {
                    player: player_id,
                    season: cohort.descriptor.season.clone(),
                })?;
            let (vector, diag) = self
                .roles
                .vector_from_row(&cohort.row(member), Some(member.position));
            if !diag.sufficient {
                return Err(CoreError::ReferenceRoleInsufficient { player: player_id });
            }
            role_vectors.push(vector);
        }

        let vectors = self.metrics.cohort_vectors(cohort, weighted_metrics)?;
        let a = vectors
            .vectors
            .get(&reference_id)
            .ok_or(CoreError::NoCandidates)?;
        let b = vectors
            .vectors
            .get(&candidate_id)
            .ok_or(CoreError::NoCandidates)?;

        let role_cos = self.clamp(role_vectors[0].cosine(&role_vectors[1]));
        let stats_cos = self.clamp(cosine(&a.values, &b.values));

        let contributions = unit_contributions(&a.values, &b.values);
        let per_metric = vectors
            .metric_ids
            .iter()
            .enumerate()
            .map(|(idx, id)| MetricPair {
                metric_id: id.clone(),
                reference_z: a.values[idx],
                candidate_z: b.values[idx],
                contribution: contributions[idx],
            })
            .collect();

        let mut role_blocks: Vec<(String, f64)> = role_vectors[0]
            .block_contributions(&role_vectors[1])
            .into_iter()
            .map(|(name, share)| (name.to_string(), share))
            .collect();
        role_blocks.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(PairBreakdown {
            role_similarity: role_cos,
            stats_similarity: stats_cos,
            total: weights.role * role_cos + weights.stats * stats_cos,
            per_metric,
            role_blocks,
        })
    }

    /// Negative cosines are not a meaningful similarity for these
    /// vectors; the upper clamp absorbs float noise either way.
    fn clamp(&self, cos: f64) -> f64 {
        if self.config.similarity_clamp {
            cos.clamp(0.0, 1.0)
        } else {
            cos.min(1.0)
        }
    }
}

fn validate_weights(weights: Weights) -> Result<Weights> {
    if !weights.role.is_finite() || !weights.stats.is_finite() {
        return Err(CoreError::InvalidWeight("weights must be finite".into()));
    }
    if weights.role < 0.0 || weights.stats < 0.0 {
        return Err(CoreError::InvalidWeight(
            "weights must be non-negative".into(),
        ));
    }
    if weights.sum() <= 0.0 {
        return Err(CoreError::InvalidWeight(
            "weights must sum to a positive number".into(),
        ));
    }
    Ok(weights.normalised())
}

fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

/// Per-dimension contributions of the unit-normalised dot product; they
/// sum to the cosine.
fn unit_contributions(a: &[f64], b: &[f64]) -> Vec<f64> {
    let na: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return vec![0.0; a.len()];
    }
    a.iter().zip(b).map(|(x, y)| (x / na) * (y / nb)).collect()
}

fn attribute_metrics(
    metric_ids: &[String],
    reference: &[f64],
    candidate: &[f64],
) -> (Vec<String>, Vec<String>) {
    let contributions = unit_contributions(reference, candidate);
    let mut order: Vec<usize> = (0..metric_ids.len()).collect();
    order.sort_by(|&i, &j| contributions[j].total_cmp(&contributions[i]));

    let closest = order
        .iter()
        .take(ATTRIBUTION_TOP_N)
        .map(|&i| metric_ids[i].clone())
        .collect();
    let most_different = order
        .iter()
        .rev()
        .take(ATTRIBUTION_TOP_N)
        .map(|&i| metric_ids[i].clone())
        .collect();
    (closest, most_different)
}
