use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::catalogue::Catalogue;
use crate::cohort::{
    build_cohort, lookup_player_by_id, lookup_player_by_name, Cohort, CohortDescriptor,
    CohortSpec, PlayerInfo,
};
use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::llm::LlmClient;
use crate::metrics::{MetricEngine, MetricValue};
use crate::parser::QueryParser;
use crate::position::PositionCode;
use crate::query::{PlayerRef, QueryKind, StructuredQuery};
use crate::role::RoleEngine;
use crate::similarity::{SimilarityEngine, SimilarityRow};
use crate::store::StoreGateway;

/// Process-level entry point: the store gateway, the catalogue (checked
/// against the store schema at open), and the configuration. Immutable
/// after construction and shareable across requests.
#[derive(Debug)]
pub struct ScoutCore {
    store: StoreGateway,
    catalogue: Catalogue,
    config: CoreConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    /// The query as executed: references resolved to ids, metric
    /// selection expanded. Re-executing this query on the same snapshot
    /// reproduces the result.
    pub query: StructuredQuery,
    pub cohort: CohortDescriptor,
    pub rows: QueryRows,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum QueryRows {
    Similarity { rows: Vec<SimilarityRow> },
    Leaderboard { rows: Vec<LeaderboardRow> },
    Comparison(ComparisonRows),
    Filter { rows: Vec<FilterRow> },
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardRow {
    pub rank: usize,
    pub player_id: i64,
    pub name: String,
    pub position: PositionCode,
    pub value: MetricValue,
    pub percentile: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonRows {
    pub players: Vec<ComparisonPlayer>,
    pub metric_ids: Vec<String>,
    /// One aligned value vector per player, in `players` order.
    pub values: Vec<Vec<MetricValue>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonPlayer {
    pub player_id: i64,
    pub name: String,
    pub position: PositionCode,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterRow {
    pub player_id: i64,
    pub name: String,
    pub position: PositionCode,
    pub age: Option<u32>,
    pub minutes: f64,
    pub sort_value: Option<MetricValue>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub degraded: bool,
    pub warnings: Vec<String>,
    pub some_insufficient_minutes: bool,
    pub skipped_candidates: usize,
}

/// Wall-clock budget for one request, checked at every suspension point.
struct RequestClock {
    start: Instant,
    budget: Duration,
}

impl RequestClock {
    fn new(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    fn check(&self, stage: &'static str) -> Result<()> {
        let elapsed = self.start.elapsed();
        if elapsed > self.budget {
            return Err(CoreError::Timeout {
                stage,
                waited_ms: elapsed.as_millis() as u64,
            });
        }
        Ok(())
    }
}

impl ScoutCore {
    /// Open the store, load the catalogue, and run the startup
    /// self-check. Any failure here is fatal to the process.
    pub fn open(store_path: &Path, catalogue_path: &Path, config: CoreConfig) -> Result<Self> {
        let store = StoreGateway::open(store_path, &config)?;
        let catalogue = Catalogue::load(catalogue_path)?;
        catalogue.self_check(store.schema())?;
        Ok(Self {
            store,
            catalogue,
            config,
        })
    }

    pub fn store(&self) -> &StoreGateway {
        &self.store
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn metric_engine(&self) -> MetricEngine<'_> {
        MetricEngine::new(&self.store, &self.catalogue, &self.config)
    }

    pub fn role_engine(&self) -> RoleEngine<'_> {
        RoleEngine::new(&self.store, &self.config)
    }

    pub fn similarity_engine(&self) -> SimilarityEngine<'_> {
        SimilarityEngine::new(&self.store, &self.catalogue, &self.config)
    }

    pub fn parser<'a>(&'a self, llm: &'a dyn LlmClient) -> QueryParser<'a> {
        QueryParser::new(&self.store, &self.catalogue, llm, &self.config)
    }

    /// Strict natural-language entry point: parse, then execute.
    pub fn ask(&self, text: &str, llm: &dyn LlmClient) -> Result<QueryOutcome> {
        let query = self.parser(llm).parse(text)?;
        self.execute(&query)
    }

    /// Lenient entry point: degraded parses execute with their warnings
    /// folded into the outcome diagnostics.
    pub fn ask_lenient(&self, text: &str, llm: &dyn LlmClient) -> Result<QueryOutcome> {
        let parse = self.parser(llm).parse_lenient(text)?;
        let mut outcome = self.execute(&parse.query)?;
        outcome.diagnostics.degraded |= parse.degraded;
        outcome.diagnostics.warnings.extend(parse.warnings);
        Ok(outcome)
    }

    /// Dispatch a validated structured query to the right engine.
    pub fn execute(&self, query: &StructuredQuery) -> Result<QueryOutcome> {
        let clock = RequestClock::new(self.config.request_timeout());
        self.catalogue.validate_query(query)?;

        clock.check("store")?;
        let reference = match &query.reference {
            Some(r) => Some(self.resolve_player(r)?),
            None => None,
        };
        let mut players = Vec::with_capacity(query.players.len());
        for r in &query.players {
            players.push(self.resolve_player(r)?);
        }

        let position_hint = reference
            .as_ref()
            .map(|p| p.position)
            .or_else(|| query.cohort.positions.first().copied());
        let resolved = self
            .catalogue
            .resolve_selection(&query.metrics, position_hint)?;
        let weighted_metrics = resolved.metrics;

        let min_minutes = query
            .cohort
            .min_minutes
            .unwrap_or(self.config.min_minutes_default);
        let compatibility = reference.as_ref().map(|p| p.position.compatible());

        clock.check("store")?;
        let cohort = build_cohort(
            &self.store,
            &CohortSpec {
                season: &query.season,
                filters: &query.cohort,
                min_minutes,
                allowed_positions: compatibility,
            },
        )?;
        debug!(kind = query.kind.as_str(), cohort = cohort.len(), "executing query");

        let mut diagnostics = Diagnostics::default();
        clock.check("compute")?;
        let rows = match query.kind {
            QueryKind::Similarity => {
                let reference = reference.as_ref().ok_or_else(|| CoreError::InvalidQuery {
                    reasons: vec!["similarity query requires a reference player".into()],
                })?;
                let outcome = self.similarity_engine().similar_to(
                    reference.player_id,
                    &cohort,
                    &weighted_metrics,
                    query.weights,
                    query.limit,
                )?;
                diagnostics.skipped_candidates =
                    outcome.skipped_role_insufficient + outcome.skipped_stats_incomplete;
                diagnostics.some_insufficient_minutes = outcome.skipped_stats_incomplete > 0;
                QueryRows::Similarity { rows: outcome.rows }
            }
            QueryKind::Leaderboard => {
                self.leaderboard(&cohort, &weighted_metrics, query.limit, &mut diagnostics)?
            }
            QueryKind::Comparison => {
                self.comparison(&clock, query, &players, &weighted_metrics, &mut diagnostics)?
            }
            QueryKind::Filter => {
                self.filter(&cohort, query, &weighted_metrics, &mut diagnostics)?
            }
        };

        let executed = StructuredQuery {
            kind: query.kind,
            reference: reference.map(|p| PlayerRef::Id(p.player_id)),
            players: players.iter().map(|p| PlayerRef::Id(p.player_id)).collect(),
            season: query.season.clone(),
            cohort: query.cohort.clone(),
            metrics: resolved.selection,
            weights: query.weights,
            limit: query.limit,
        };

        Ok(QueryOutcome {
            query: executed,
            cohort: cohort.descriptor.clone(),
            rows,
            diagnostics,
        })
    }

    fn leaderboard(
        &self,
        cohort: &Cohort,
        weighted_metrics: &[(String, f64)],
        limit: usize,
        diagnostics: &mut Diagnostics,
    ) -> Result<QueryRows> {
        if cohort.is_empty() {
            return Err(CoreError::NoCandidates);
        }
        // Ranked by the first metric of the selection.
        let (metric_id, _) = weighted_metrics
            .first()
            .ok_or_else(|| CoreError::InvalidQuery {
                reasons: vec!["leaderboard requires a metric".into()],
            })?;
        let metric = self
            .catalogue
            .resolve(metric_id)
            .ok_or_else(|| CoreError::UnknownMetric(metric_id.clone()))?;
        let engine = self.metric_engine();

        let percentiles = match engine.percentiles(metric_id, cohort) {
            Ok(table) => Some(table),
            Err(CoreError::CohortTooSmall { size, required }) => {
                diagnostics.warnings.push(format!(
                    "cohort of {size} below the minimum of {required}; percentiles omitted"
                ));
                None
            }
            Err(err) => return Err(err),
        };

        let mut valid: Vec<LeaderboardRow> = Vec::new();
        let mut insufficient: Vec<LeaderboardRow> = Vec::new();
        for member in cohort.members() {
            let row = cohort.row(member);
            let value = engine.value_from_row(metric, &row, member.minutes);
            let entry = LeaderboardRow {
                rank: 0,
                player_id: member.player_id,
                name: member.name.clone(),
                position: member.position,
                value: value.clone(),
                percentile: percentiles
                    .as_ref()
                    .and_then(|p| p.by_player.get(&member.player_id).copied()),
            };
            if value.is_insufficient() {
                insufficient.push(entry);
            } else {
                valid.push(entry);
            }
        }

        valid.sort_by(|a, b| {
            let (va, vb) = (
                a.value.value().unwrap_or_default(),
                b.value.value().unwrap_or_default(),
            );
            let cmp = if metric.higher_is_better {
                vb.total_cmp(&va)
            } else {
                va.total_cmp(&vb)
            };
            cmp.then(a.player_id.cmp(&b.player_id))
        });

        diagnostics.some_insufficient_minutes = !insufficient.is_empty();
        let mut rows = valid;
        rows.extend(insufficient);
        rows.truncate(limit);
        for (idx, row) in rows.iter_mut().enumerate() {
            row.rank = idx + 1;
        }
        Ok(QueryRows::Leaderboard { rows })
    }

    fn comparison(
        &self,
        clock: &RequestClock,
        query: &StructuredQuery,
        players: &[PlayerInfo],
        weighted_metrics: &[(String, f64)],
        diagnostics: &mut Diagnostics,
    ) -> Result<QueryRows> {
        let metric_ids: Vec<String> = weighted_metrics.iter().map(|(id, _)| id.clone()).collect();
        let engine = self.metric_engine();

        let mut values = Vec::with_capacity(players.len());
        for player in players {
            clock.check("store")?;
            match engine.values(player.player_id, &query.season, &metric_ids) {
                Ok(map) => {
                    let aligned: Vec<MetricValue> = metric_ids
                        .iter()
                        .map(|id| {
                            map.get(id).cloned().unwrap_or(MetricValue::Insufficient {
                                reason: crate::metrics::InsufficiencyReason::MissingData,
                            })
                        })
                        .collect();
                    if aligned.iter().any(|v| v.is_insufficient()) {
                        diagnostics.some_insufficient_minutes = true;
                    }
                    values.push(aligned);
                }
                Err(CoreError::NoSeasonData { .. }) => {
                    // Partial result: the row stays, every cell flagged.
                    diagnostics.warnings.push(format!(
                        "{} has no data for {}",
                        player.name, query.season
                    ));
                    diagnostics.some_insufficient_minutes = true;
                    values.push(vec![
                        MetricValue::Insufficient {
                            reason: crate::metrics::InsufficiencyReason::MissingData,
                        };
                        metric_ids.len()
                    ]);
                }
                Err(err) => return Err(err),
            }
        }

        Ok(QueryRows::Comparison(ComparisonRows {
            players: players
                .iter()
                .map(|p| ComparisonPlayer {
                    player_id: p.player_id,
                    name: p.name.clone(),
                    position: p.position,
                })
                .collect(),
            metric_ids,
            values,
        }))
    }

    fn filter(
        &self,
        cohort: &Cohort,
        query: &StructuredQuery,
        weighted_metrics: &[(String, f64)],
        diagnostics: &mut Diagnostics,
    ) -> Result<QueryRows> {
        if cohort.is_empty() {
            return Err(CoreError::NoCandidates);
        }
        let engine = self.metric_engine();
        // An explicit metric selection sorts the filtered rows; the
        // default selection leaves them in player-id order.
        let sort_metric = if query.metrics.is_default() {
            None
        } else {
            weighted_metrics
                .first()
                .and_then(|(id, _)| self.catalogue.resolve(id))
        };

        let mut rows: Vec<FilterRow> = cohort
            .members()
            .iter()
            .map(|member| {
                let sort_value = sort_metric.map(|metric| {
                    engine.value_from_row(metric, &cohort.row(member), member.minutes)
                });
                if sort_value.as_ref().is_some_and(|v| v.is_insufficient()) {
                    diagnostics.some_insufficient_minutes = true;
                }
                FilterRow {
                    player_id: member.player_id,
                    name: member.name.clone(),
                    position: member.position,
                    age: member.age,
                    minutes: member.minutes,
                    sort_value,
                }
            })
            .collect();

        if let Some(metric) = sort_metric {
            rows.sort_by(|a, b| {
                let (va, vb) = (
                    a.sort_value.as_ref().and_then(|v| v.value()),
                    b.sort_value.as_ref().and_then(|v| v.value()),
                );
                match (va, vb) {
                    (Some(x), Some(y)) => {
                        let cmp = if metric.higher_is_better {
                            y.total_cmp(&x)
                        } else {
                            x.total_cmp(&y)
                        };
                        cmp.then(a.player_id.cmp(&b.player_id))
                    }
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => a.player_id.cmp(&b.player_id),
                }
            });
        }
        rows.truncate(query.limit);
        Ok(QueryRows::Filter { rows })
    }

    fn resolve_player(&self, reference: &PlayerRef) -> Result<PlayerInfo> {
        match reference {
            PlayerRef::Id(id) => lookup_player_by_id(&self.store, *id),
            PlayerRef::Name(name) => lookup_player_by_name(&self.store, name),
        }
    }
}
