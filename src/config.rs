use std::time::Duration;

/// Runtime knobs for the core. Defaults match the deployed snapshot
/// pipeline; every field can be overridden through a `SCOUT_*` environment
/// variable so hosting processes do not need a config file.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Minutes below which per-90 metrics are reported as insufficient.
    pub min_minutes_default: u32,
    /// Minimum cohort size for percentiles and standardisation.
    pub min_cohort_size: usize,
    /// Minimum positional events for a non-zero role vector.
    pub role_min_events: u32,
    pub role_weight: f64,
    pub stats_weight: f64,
    /// Map negative cosine components to zero.
    pub similarity_clamp: bool,
    /// Z-scores are clipped to +/- this value.
    pub zscore_clip: f64,
    pub llm_temperature: f64,
    pub llm_max_tokens: u32,
    pub llm_timeout_ms: u64,
    pub store_pool_size: usize,
    pub store_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            min_minutes_default: 450,
            min_cohort_size: 20,
            role_min_events: 50,
            role_weight: 0.6,
            stats_weight: 0.4,
            similarity_clamp: true,
            zscore_clip: 3.0,
            llm_temperature: 0.1,
            llm_max_tokens: 1000,
            llm_timeout_ms: 30_000,
            store_pool_size: 4,
            store_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl CoreConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            min_minutes_default: env_parse("SCOUT_MIN_MINUTES", d.min_minutes_default),
            min_cohort_size: env_parse("SCOUT_MIN_COHORT", d.min_cohort_size),
            role_min_events: env_parse("SCOUT_ROLE_MIN_EVENTS", d.role_min_events),
            role_weight: env_parse("SCOUT_ROLE_WEIGHT", d.role_weight),
            stats_weight: env_parse("SCOUT_STATS_WEIGHT", d.stats_weight),
            similarity_clamp: env_parse("SCOUT_SIMILARITY_CLAMP", d.similarity_clamp),
            zscore_clip: env_parse("SCOUT_ZSCORE_CLIP", d.zscore_clip),
            llm_temperature: env_parse("SCOUT_LLM_TEMPERATURE", d.llm_temperature),
            llm_max_tokens: env_parse("SCOUT_LLM_MAX_TOKENS", d.llm_max_tokens),
            llm_timeout_ms: env_parse("SCOUT_LLM_TIMEOUT_MS", d.llm_timeout_ms),
            store_pool_size: env_parse("SCOUT_STORE_POOL", d.store_pool_size).max(1),
            store_timeout_ms: env_parse("SCOUT_STORE_TIMEOUT_MS", d.store_timeout_ms),
            request_timeout_ms: env_parse("SCOUT_REQUEST_TIMEOUT_MS", d.request_timeout_ms),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_millis(self.llm_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|val| val.trim().parse::<T>().ok())
        .unwrap_or(default)
}
