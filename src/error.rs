use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Error surface of the core. Input errors are surfaced to the caller
/// verbatim; the core never substitutes a different metric, cohort, or
/// player for the requested one. Data-sufficiency conditions only appear
/// here when the whole operation is impossible; per-row conditions are
/// reported as values alongside partial results.
#[derive(Error, Debug)]
pub enum CoreError {
    // Input errors.
    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("metric '{metric}' is not defined for position {position}")]
    IncompatibleMetricForPosition { metric: String, position: String },

    #[error("invalid weight: {0}")]
    InvalidWeight(String),

    #[error("invalid limit {0}: must be in 1..=500")]
    InvalidLimit(i64),

    #[error("invalid query: {}", reasons.join("; "))]
    InvalidQuery { reasons: Vec<String> },

    #[error("could not parse query: {}", reasons.join("; "))]
    Parse { reasons: Vec<String> },

    #[error("unknown player: {0}")]
    UnknownPlayer(String),

    #[error("unknown league: {0}")]
    UnknownLeague(String),

    #[error("unknown season: {0}")]
    UnknownSeason(String),

    // Data-sufficiency conditions that block the whole operation.
    #[error("player {player} has no data for season {season}")]
    NoSeasonData { player: i64, season: String },

    #[error("reference player {player} has insufficient positional data")]
    ReferenceRoleInsufficient { player: i64 },

    #[error("cohort has {size} members, at least {required} required")]
    CohortTooSmall { size: usize, required: usize },

    #[error("no candidates matched the cohort filters")]
    NoCandidates,

    // Transient conditions; the host may retry, the core does not.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("language model unavailable: {0}")]
    LlmUnavailable(String),

    #[error("{stage} timed out after {waited_ms} ms")]
    Timeout { stage: &'static str, waited_ms: u64 },

    // Fatal / integrity defects.
    #[error("forbidden statement: {0}")]
    ForbiddenStatement(String),

    #[error("store schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("catalogue invalid: {}", reasons.join("; "))]
    CatalogueInvalid { reasons: Vec<String> },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// True for conditions the host may reasonably retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::StoreUnavailable(_)
                | CoreError::LlmUnavailable(_)
                | CoreError::Timeout { .. }
        )
    }

    /// True for defects that should abort the process at startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::ForbiddenStatement(_)
                | CoreError::SchemaMismatch(_)
                | CoreError::CatalogueInvalid { .. }
        )
    }
}
