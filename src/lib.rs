//! Retrieval and ranking core for the scouting analytics platform.
//!
//! A pure, read-only query engine over a relational snapshot of football
//! statistics. The metric catalogue is the single source of truth for
//! every quantity the system can name; the role engine condenses a
//! player's spatial behaviour into a 20-dimensional fingerprint; the
//! similarity engine ranks candidates against a reference with
//! component-level attribution; and the query parser turns free text
//! into the same structured query form without ever inventing a number.

pub mod catalogue;
pub mod cohort;
pub mod config;
pub mod error;
pub mod executor;
pub mod llm;
pub mod metrics;
pub mod parser;
pub mod position;
pub mod query;
pub mod role;
pub mod similarity;
pub mod store;

pub use catalogue::Catalogue;
pub use config::CoreConfig;
pub use error::{CoreError, Result};
pub use executor::{QueryOutcome, QueryRows, ScoutCore};
pub use llm::{HttpLlmClient, LlmClient, ScriptedClient};
pub use metrics::{MetricValue, StatsVector};
pub use parser::{LenientParse, QueryParser};
pub use query::{CohortFilters, MetricSelection, PlayerRef, QueryKind, StructuredQuery, Weights};
pub use role::{RoleVector, ROLE_DIMS};
pub use store::StoreGateway;
