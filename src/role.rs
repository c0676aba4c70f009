use std::ops::Range;

use serde::Serialize;
use tracing::debug;

use crate::cohort::player_season_table;
use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::position::PositionCode;
use crate::store::{RowView, StoreGateway};

pub const ROLE_DIMS: usize = 20;

/// Fixed block layout. The order is part of the contract: explain and
/// attribution reverse it, and vectors from different processes must be
/// comparable component by component.
pub const ROLE_BLOCKS: [(&str, Range<usize>); 5] = [
    ("position", 0..4),
    ("spread", 4..8),
    ("zones", 8..14),
    ("boxes", 14..16),
    ("pass mix", 16..20),
];

pub const COMPONENT_NAMES: [&str; ROLE_DIMS] = [
    "goalkeeper",
    "defender",
    "midfielder",
    "forward",
    "avg longitudinal position",
    "avg lateral position",
    "longitudinal spread",
    "lateral spread",
    "defensive third share",
    "middle third share",
    "attacking third share",
    "left channel share",
    "central channel share",
    "right channel share",
    "own box share",
    "opposition box share",
    "forward pass share",
    "backward pass share",
    "lateral pass share",
    "progressive pass share",
];

/// L2-normalised spatial/behavioural fingerprint, or the canonical zero
/// vector for a player without enough positional events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleVector {
    components: [f64; ROLE_DIMS],
}

impl RoleVector {
    pub fn zero() -> Self {
        Self {
            components: [0.0; ROLE_DIMS],
        }
    }

    pub fn components(&self) -> &[f64; ROLE_DIMS] {
        &self.components
    }

    pub fn is_zero(&self) -> bool {
        self.components.iter().all(|c| *c == 0.0)
    }

    pub fn norm(&self) -> f64 {
        self.components.iter().map(|c| c * c).sum::<f64>().sqrt()
    }

    /// Cosine similarity; zero vectors compare as 0.
    pub fn cosine(&self, other: &RoleVector) -> f64 {
        let dot: f64 = self
            .components
            .iter()
            .zip(other.components.iter())
            .map(|(a, b)| a * b)
            .sum();
        let norms = self.norm() * other.norm();
        if norms == 0.0 {
            return 0.0;
        }
        dot / norms
    }

    /// Per-block share of the dot product with another vector. For unit
    /// vectors the shares sum to the cosine.
    pub fn block_contributions(&self, other: &RoleVector) -> Vec<(&'static str, f64)> {
        ROLE_BLOCKS
            .iter()
            .map(|(name, range)| {
                let share: f64 = range
                    .clone()
                    .map(|i| self.components[i] * other.components[i])
                    .sum();
                (*name, share)
            })
            .collect()
    }

    /// Reverse the block layout into named values.
    pub fn explain(&self) -> RoleExplanation {
        let blocks = ROLE_BLOCKS
            .iter()
            .map(|(name, range)| RoleBlock {
                name: *name,
                components: range
                    .clone()
                    .map(|i| (COMPONENT_NAMES[i], self.components[i]))
                    .collect(),
                share: range.clone().map(|i| self.components[i].powi(2)).sum(),
            })
            .collect();
        RoleExplanation { blocks }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleDiagnostics {
    /// Positional events backing the vector.
    pub events: u32,
    /// Norm of the assembled vector before normalisation.
    pub raw_norm: f64,
    pub sufficient: bool,
}

/// Named decomposition of a role vector back into its blocks.
#[derive(Debug, Clone, Serialize)]
pub struct RoleExplanation {
    pub blocks: Vec<RoleBlock>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleBlock {
    pub name: &'static str,
    pub components: Vec<(&'static str, f64)>,
    /// Share of the vector's squared norm carried by this block.
    pub share: f64,
}

impl RoleExplanation {
    pub fn dominant_block(&self) -> Option<&RoleBlock> {
        self.blocks
            .iter()
            .max_by(|a, b| a.share.total_cmp(&b.share))
    }
}

impl std::fmt::Display for RoleExplanation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (idx, block) in self.blocks.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{} ({:.0}%):", block.name, block.share * 100.0)?;
            for (name, value) in &block.components {
                write!(f, " {name} {value:.3}")?;
            }
        }
        Ok(())
    }
}

pub struct RoleEngine<'a> {
    store: &'a StoreGateway,
    config: &'a CoreConfig,
}

impl<'a> RoleEngine<'a> {
    pub fn new(store: &'a StoreGateway, config: &'a CoreConfig) -> Self {
        Self { store, config }
    }

    /// Role vector for a player-season, fetched from the store.
    pub fn role_vector(
        &self,
        player_id: i64,
        season: &str,
    ) -> Result<(RoleVector, RoleDiagnostics)> {
        let table = player_season_table(self.store, player_id, season)?;
        let Some(row) = table.rows().next() else {
            return Err(CoreError::NoSeasonData {
                player: player_id,
                season: season.to_string(),
            });
        };
        let position = row.str("position").and_then(PositionCode::from_code);
        Ok(self.vector_from_row(&row, position))
    }

    /// Assemble a role vector from an already-fetched aggregated season
    /// row. Computation is a pure fold over the row, so two calls on the
    /// same snapshot produce bit-identical output.
    pub fn vector_from_row(
        &self,
        row: &RowView<'_>,
        position: Option<PositionCode>,
    ) -> (RoleVector, RoleDiagnostics) {
        let events = row.f64("positional_events").unwrap_or(0.0).max(0.0) as u32;
        if events < self.config.role_min_events {
            debug!(events, required = self.config.role_min_events, "role-insufficient");
            return (
                RoleVector::zero(),
                RoleDiagnostics {
                    events,
                    raw_norm: 0.0,
                    sufficient: false,
                },
            );
        }

        let mut c = [0.0_f64; ROLE_DIMS];

        // Block 1: soft position-group encoding.
        if let Some(code) = position {
            c[0..4].copy_from_slice(&code.group_weights());
        }

        // Block 2: location and dispersion rescaled against the pitch.
        c[4] = (row.f64("avg_x").unwrap_or(0.0) / 100.0).clamp(0.0, 1.0);
        c[5] = (row.f64("avg_y").unwrap_or(0.0) / 100.0).clamp(0.0, 1.0);
        c[6] = (row.f64("std_x").unwrap_or(0.0) / 100.0).clamp(0.0, 1.0);
        c[7] = (row.f64("std_y").unwrap_or(0.0) / 100.0).clamp(0.0, 1.0);

        // Block 3: vertical thirds and lateral channels, each summing to 1.
        let thirds = fractions([
            row.f64("touches_def_third").unwrap_or(0.0),
            row.f64("touches_mid_third").unwrap_or(0.0),
            row.f64("touches_att_third").unwrap_or(0.0),
        ]);
        c[8..11].copy_from_slice(&thirds);
        let channels = fractions([
            row.f64("touches_left").unwrap_or(0.0),
            row.f64("touches_centre").unwrap_or(0.0),
            row.f64("touches_right").unwrap_or(0.0),
        ]);
        c[11..14].copy_from_slice(&channels);

        // Block 4: box presence as fractions of all touches.
        let touches = row.f64("touches").unwrap_or(0.0);
        if touches > 0.0 {
            c[14] = (row.f64("touches_own_box").unwrap_or(0.0) / touches).clamp(0.0, 1.0);
            c[15] = (row.f64("touches_opp_box").unwrap_or(0.0) / touches).clamp(0.0, 1.0);
        }

        // Block 5: four-way completed-pass mix summing to 1.
        let mix = fractions4([
            row.f64("passes_forward").unwrap_or(0.0),
            row.f64("passes_backward").unwrap_or(0.0),
            row.f64("passes_lateral").unwrap_or(0.0),
            row.f64("progressive_passes").unwrap_or(0.0),
        ]);
        c[16..20].copy_from_slice(&mix);

        let raw_norm = c.iter().map(|v| v * v).sum::<f64>().sqrt();
        if raw_norm > 0.0 {
            for v in &mut c {
                *v /= raw_norm;
            }
        }

        (
            RoleVector { components: c },
            RoleDiagnostics {
                events,
                raw_norm,
                sufficient: true,
            },
        )
    }

    /// Reverse the block layout into named values.
    pub fn explain(&self, vector: &RoleVector) -> RoleExplanation {
        vector.explain()
    }
}

fn fractions(parts: [f64; 3]) -> [f64; 3] {
    let total: f64 = parts.iter().sum();
    if total <= 0.0 {
        return [0.0; 3];
    }
    [parts[0] / total, parts[1] / total, parts[2] / total]
}

fn fractions4(parts: [f64; 4]) -> [f64; 4] {
    let total: f64 = parts.iter().sum();
    if total <= 0.0 {
        return [0.0; 4];
    }
    [
        parts[0] / total,
        parts[1] / total,
        parts[2] / total,
        parts[3] / total,
    ]
}
