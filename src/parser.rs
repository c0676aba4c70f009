use serde::Deserialize;
use tracing::{debug, warn};

use crate::catalogue::Catalogue;
use crate::cohort::{latest_season_label, league_names, lookup_player_by_name};
use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::llm::LlmClient;
use crate::position::PositionCode;
use crate::query::{
    CohortFilters, MetricSelection, PlayerRef, QueryKind, StructuredQuery, Weights, MAX_LIMIT,
};
use crate::store::StoreGateway;

const SIMILARITY_HINTS: [&str; 7] = [
    "similar",
    "like",
    "comparable",
    "alternative",
    "replacement",
    "instead of",
    "style of",
];

const POSITION_HINTS: [(&str, PositionCode); 10] = [
    ("goalkeeper", PositionCode::Gk),
    ("keeper", PositionCode::Gk),
    ("centre-back", PositionCode::Cb),
    ("center-back", PositionCode::Cb),
    ("full-back", PositionCode::Lb),
    ("defender", PositionCode::Df),
    ("midfielder", PositionCode::Mf),
    ("winger", PositionCode::Lw),
    ("striker", PositionCode::St),
    ("forward", PositionCode::Fw),
];

/// Natural-language front door. The language model only ever sees a
/// bounded vocabulary and only ever returns a structured draft; every
/// name in the draft must resolve against the catalogue and the store or
/// the parse is refused. The parser returns a specification, never a
/// number.
pub struct QueryParser<'a> {
    store: &'a StoreGateway,
    catalogue: &'a Catalogue,
    llm: &'a dyn LlmClient,
    config: &'a CoreConfig,
}

#[derive(Debug)]
pub struct LenientParse {
    pub query: StructuredQuery,
    pub degraded: bool,
    pub warnings: Vec<String>,
}

/// Shape the model must return. Unknown fields are a schema violation,
/// not an extension point.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LlmDraft {
    kind: Option<String>,
    reference_player: Option<String>,
    players: Option<Vec<String>>,
    position: Option<String>,
    age_min: Option<u32>,
    age_max: Option<u32>,
    leagues: Option<Vec<String>>,
    season: Option<String>,
    metrics: Option<Vec<String>>,
    preset: Option<String>,
    min_minutes: Option<u32>,
    limit: Option<usize>,
}

impl<'a> QueryParser<'a> {
    pub fn new(
        store: &'a StoreGateway,
        catalogue: &'a Catalogue,
        llm: &'a dyn LlmClient,
        config: &'a CoreConfig,
    ) -> Self {
        Self {
            store,
            catalogue,
            llm,
            config,
        }
    }

    /// Strict parse: any unresolved token refuses the whole query.
    pub fn parse(&self, text: &str) -> Result<StructuredQuery> {
        let draft = match self.draft(text) {
            Ok(draft) => draft,
            Err(err @ (CoreError::LlmUnavailable(_) | CoreError::Timeout { .. })) => {
                return Err(err)
            }
            Err(_) => {
                return Err(CoreError::Parse {
                    reasons: vec!["language model returned invalid structured output".into()],
                })
            }
        };

        let resolution = self.resolve(&draft, text)?;
        if !resolution.reasons.is_empty() {
            return Err(CoreError::Parse {
                reasons: resolution.reasons,
            });
        }

        let query = resolution.query;
        if let Err(err) = self.catalogue.validate_query(&query) {
            return Err(CoreError::Parse {
                reasons: vec![err.to_string()],
            });
        }
        Ok(query)
    }

    /// Lenient parse: unresolved tokens are dropped with warnings and the
    /// query falls back to the safest scope the text supports. Invented
    /// metrics are never substituted.
    pub fn parse_lenient(&self, text: &str) -> Result<LenientParse> {
        let draft = match self.draft(text) {
            Ok(draft) => draft,
            Err(err @ (CoreError::LlmUnavailable(_) | CoreError::Timeout { .. })) => {
                return Err(err)
            }
            Err(_) => {
                warn!("invalid model output, falling back to keyword scan");
                return Ok(self.fallback_query(
                    text,
                    vec!["language model returned invalid structured output".into()],
                ));
            }
        };

        let mut resolution = self.resolve(&draft, text)?;
        let mut warnings = resolution.warnings;
        warnings.extend(resolution.reasons.iter().cloned());
        let mut degraded = !resolution.reasons.is_empty();

        // Dropped every metric? Scope back to the position preset.
        if degraded && resolution.dropped_all_metrics {
            resolution.query.metrics = MetricSelection::PositionDefault;
        }

        if resolution.query.limit > MAX_LIMIT {
            warnings.push(format!(
                "limit {} clamped to {MAX_LIMIT}",
                resolution.query.limit
            ));
            resolution.query.limit = MAX_LIMIT;
            degraded = true;
        }
        if resolution.query.limit == 0 {
            resolution.query.limit = 1;
            degraded = true;
        }

        if is_similarity_text(text) && resolution.query.kind != QueryKind::Similarity {
            warnings.push("text reads like a similarity request".into());
        }

        if self.catalogue.validate_query(&resolution.query).is_err() {
            // Even the degraded query failed validation; retreat to the
            // safe default scope.
            return Ok(self.fallback_query(text, warnings));
        }

        Ok(LenientParse {
            query: resolution.query,
            degraded,
            warnings,
        })
    }

    /// Layer 1 + 2: constrained prompt, then strict schema parse.
    fn draft(&self, text: &str) -> Result<LlmDraft> {
        let prompt = self.build_prompt(text)?;
        let completion = self.llm.complete(&prompt)?;
        let cleaned = strip_fences(&completion);
        debug!(raw_len = completion.len(), "model draft received");
        let draft: LlmDraft = serde_json::from_str(cleaned)?;
        Ok(draft)
    }

    /// Layer 3: every name resolves against the catalogue and the store.
    fn resolve(&self, draft: &LlmDraft, text: &str) -> Result<Resolution> {
        let mut reasons: Vec<String> = Vec::new();
        let warnings: Vec<String> = Vec::new();

        let mut reference = None;
        if let Some(name) = &draft.reference_player {
            match lookup_player_by_name(self.store, name) {
                Ok(info) => reference = Some(PlayerRef::Id(info.player_id)),
                Err(_) => reasons.push(format!("unknown player: {name}")),
            }
        }

        let mut players = Vec::new();
        for name in draft.players.iter().flatten() {
            match lookup_player_by_name(self.store, name) {
                Ok(info) => players.push(PlayerRef::Id(info.player_id)),
                Err(_) => reasons.push(format!("unknown player: {name}")),
            }
        }

        let kind = match draft.kind.as_deref() {
            Some("similarity") => QueryKind::Similarity,
            Some("leaderboard") => QueryKind::Leaderboard,
            Some("comparison") => QueryKind::Comparison,
            Some("filter") => QueryKind::Filter,
            Some(other) => {
                reasons.push(format!("unknown query kind: {other}"));
                QueryKind::Filter
            }
            None => {
                if reference.is_some() || is_similarity_text(text) {
                    QueryKind::Similarity
                } else if players.len() >= 2 {
                    QueryKind::Comparison
                } else {
                    QueryKind::Leaderboard
                }
            }
        };

        let mut positions = Vec::new();
        if let Some(raw) = &draft.position {
            match PositionCode::from_code(raw) {
                Some(code) => positions.push(code),
                None => reasons.push(format!("unknown position: {raw}")),
            }
        }

        let mut leagues = Vec::new();
        if let Some(requested) = &draft.leagues {
            let known = league_names(self.store)?;
            for name in requested {
                match known.iter().find(|k| k.eq_ignore_ascii_case(name)) {
                    Some(canonical) => leagues.push(canonical.clone()),
                    None => reasons.push(format!("unknown league: {name}")),
                }
            }
        }

        let season = match &draft.season {
            Some(label) => match crate::cohort::resolve_season(self.store, label) {
                Ok(_) => label.clone(),
                Err(_) => {
                    reasons.push(format!("unknown season: {label}"));
                    latest_season_label(self.store)?
                }
            },
            None => latest_season_label(self.store)?,
        };

        let mut resolved_metrics = Vec::new();
        let mut requested_metrics = 0usize;
        for term in draft.metrics.iter().flatten() {
            requested_metrics += 1;
            match self.catalogue.resolve(term) {
                Some(metric) => resolved_metrics.push(metric.id.clone()),
                None => reasons.push(format!("unknown term: {term}")),
            }
        }
        let dropped_all_metrics = requested_metrics > 0 && resolved_metrics.is_empty();

        let metrics = if let Some(preset) = &draft.preset {
            if self.catalogue.preset(preset).is_some() {
                MetricSelection::Preset(preset.trim().to_lowercase())
            } else {
                reasons.push(format!("unknown preset: {preset}"));
                MetricSelection::PositionDefault
            }
        } else if !resolved_metrics.is_empty() {
            MetricSelection::Metrics(resolved_metrics)
        } else {
            MetricSelection::PositionDefault
        };

        let query = StructuredQuery {
            kind,
            reference,
            players,
            season,
            cohort: CohortFilters {
                leagues,
                positions,
                age_min: draft.age_min,
                age_max: draft.age_max,
                min_minutes: draft.min_minutes,
            },
            metrics,
            weights: Weights {
                role: self.config.role_weight,
                stats: self.config.stats_weight,
            },
            limit: draft.limit.unwrap_or(10),
        };

        Ok(Resolution {
            query,
            reasons,
            warnings,
            dropped_all_metrics,
        })
    }

    /// Layer 4: the safe-default query. Scoped to whatever the text most
    /// plausibly references, with the position's preset metric set.
    fn fallback_query(&self, text: &str, mut warnings: Vec<String>) -> LenientParse {
        let lowered = text.to_lowercase();
        let position = POSITION_HINTS
            .iter()
            .find(|(needle, _)| lowered.contains(needle))
            .map(|(_, code)| *code);

        let season = latest_season_label(self.store).unwrap_or_default();
        // A similarity fallback with no resolvable reference cannot run;
        // the safe default is always a filter scope.
        if is_similarity_text(text) {
            warnings.push("no reference player resolved, returning a filter query".into());
        }
        warnings.push("query degraded to safe defaults".into());
        LenientParse {
            query: StructuredQuery {
                kind: QueryKind::Filter,
                reference: None,
                players: Vec::new(),
                season,
                cohort: CohortFilters {
                    leagues: Vec::new(),
                    positions: position.into_iter().collect(),
                    age_min: None,
                    age_max: None,
                    min_minutes: None,
                },
                metrics: MetricSelection::PositionDefault,
                weights: Weights {
                    role: self.config.role_weight,
                    stats: self.config.stats_weight,
                },
                limit: 10,
            },
            degraded: true,
            warnings,
        }
    }

    /// The bounded vocabulary: every metric id and alias, every preset,
    /// every position code, and the store's league names. The model is
    /// asked for the structured object only.
    pub fn build_prompt(&self, text: &str) -> Result<String> {
        let mut prompt = String::with_capacity(4096);
        prompt.push_str(
            "You translate football scouting questions into a structured query object.\n\
             You never compute statistics and never invent metric names.\n\n",
        );

        prompt.push_str("METRICS (id: aliases):\n");
        for metric in self.catalogue.metrics() {
            prompt.push_str(&format!(
                "- {}: {}",
                metric.id,
                metric.name.to_lowercase()
            ));
            if !metric.aliases.is_empty() {
                prompt.push_str(&format!(", {}", metric.aliases.join(", ")));
            }
            prompt.push('\n');
        }

        prompt.push_str("\nPRESETS:\n");
        for (key, preset) in self.catalogue.presets() {
            prompt.push_str(&format!("- {key}: {}\n", preset.name.to_lowercase()));
        }

        prompt.push_str(
            "\nPOSITIONS: GK, CB, LB, RB, WB, DM, CM, AM, LW, RW, ST, DF, MF, FW\n",
        );

        prompt.push_str("\nLEAGUES:\n");
        for league in league_names(self.store)? {
            prompt.push_str(&format!("- {league}\n"));
        }

        prompt.push_str(
            "\nReturn ONLY a JSON object with this shape (all fields optional):\n\
             {\"kind\": \"similarity|leaderboard|comparison|filter\",\n \
             \"reference_player\": \"name\", \"players\": [\"name\"],\n \
             \"position\": \"code\", \"age_min\": 0, \"age_max\": 0,\n \
             \"leagues\": [\"name\"], \"season\": \"2024-25\",\n \
             \"metrics\": [\"metric id or alias\"], \"preset\": \"preset id\",\n \
             \"min_minutes\": 0, \"limit\": 0}\n\
             Use only metric ids, aliases, presets, positions and leagues listed above.\n\
             If a term has no match in the lists, omit it. No markdown, no prose.\n\n",
        );

        prompt.push_str("QUESTION: ");
        prompt.push_str(text);
        Ok(prompt)
    }
}

struct Resolution {
    query: StructuredQuery,
    reasons: Vec<String>,
    warnings: Vec<String>,
    dropped_all_metrics: bool,
}

fn is_similarity_text(text: &str) -> bool {
    let lowered = text.to_lowercase();
    SIMILARITY_HINTS
        .iter()
        .any(|needle| lowered.contains(needle))
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches(['\r', '\n'])
        .trim_end_matches('`')
        .trim()
}
