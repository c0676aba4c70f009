use serde::{Deserialize, Serialize};

/// Position codes as stored in the players table. The group codes
/// (DF/MF/FW) appear both as declared positions for players the provider
/// does not classify further and as filter values in queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionCode {
    #[serde(rename = "GK")]
    Gk,
    #[serde(rename = "CB")]
    Cb,
    #[serde(rename = "LB")]
    Lb,
    #[serde(rename = "RB")]
    Rb,
    #[serde(rename = "WB")]
    Wb,
    #[serde(rename = "DM")]
    Dm,
    #[serde(rename = "CM")]
    Cm,
    #[serde(rename = "AM")]
    Am,
    #[serde(rename = "LW")]
    Lw,
    #[serde(rename = "RW")]
    Rw,
    #[serde(rename = "ST")]
    St,
    #[serde(rename = "DF")]
    Df,
    #[serde(rename = "MF")]
    Mf,
    #[serde(rename = "FW")]
    Fw,
}

/// The four coarse groups used for role encoding and metric scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionGroup {
    #[serde(rename = "GK")]
    Goalkeeper,
    #[serde(rename = "DF")]
    Defender,
    #[serde(rename = "MF")]
    Midfielder,
    #[serde(rename = "FW")]
    Forward,
}

impl PositionGroup {
    pub const ALL: [PositionGroup; 4] = [
        PositionGroup::Goalkeeper,
        PositionGroup::Defender,
        PositionGroup::Midfielder,
        PositionGroup::Forward,
    ];

    pub fn label(self) -> &'static str {
        match self {
            PositionGroup::Goalkeeper => "goalkeeper",
            PositionGroup::Defender => "defender",
            PositionGroup::Midfielder => "midfielder",
            PositionGroup::Forward => "forward",
        }
    }
}

impl PositionCode {
    pub fn from_code(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GK" => Some(Self::Gk),
            "CB" => Some(Self::Cb),
            "LB" => Some(Self::Lb),
            "RB" => Some(Self::Rb),
            "WB" | "LWB" | "RWB" => Some(Self::Wb),
            "DM" => Some(Self::Dm),
            "CM" => Some(Self::Cm),
            "AM" => Some(Self::Am),
            "LW" | "LM" => Some(Self::Lw),
            "RW" | "RM" => Some(Self::Rw),
            "ST" | "CF" => Some(Self::St),
            "DF" => Some(Self::Df),
            "MF" => Some(Self::Mf),
            "FW" => Some(Self::Fw),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gk => "GK",
            Self::Cb => "CB",
            Self::Lb => "LB",
            Self::Rb => "RB",
            Self::Wb => "WB",
            Self::Dm => "DM",
            Self::Cm => "CM",
            Self::Am => "AM",
            Self::Lw => "LW",
            Self::Rw => "RW",
            Self::St => "ST",
            Self::Df => "DF",
            Self::Mf => "MF",
            Self::Fw => "FW",
        }
    }

    /// Dominant group for this code.
    pub fn group(self) -> PositionGroup {
        match self {
            Self::Gk => PositionGroup::Goalkeeper,
            Self::Cb | Self::Lb | Self::Rb | Self::Wb | Self::Df => PositionGroup::Defender,
            Self::Dm | Self::Cm | Self::Am | Self::Mf => PositionGroup::Midfielder,
            Self::Lw | Self::Rw | Self::St | Self::Fw => PositionGroup::Forward,
        }
    }

    /// Soft group encoding in (GK, DF, MF, FW) order. Hybrid codes split
    /// their weight across the two groups they straddle; each row sums
    /// to 1.
    pub fn group_weights(self) -> [f64; 4] {
        match self {
            Self::Gk => [1.0, 0.0, 0.0, 0.0],
            Self::Cb | Self::Df => [0.0, 1.0, 0.0, 0.0],
            Self::Lb | Self::Rb => [0.0, 0.85, 0.15, 0.0],
            Self::Wb => [0.0, 0.65, 0.35, 0.0],
            Self::Dm => [0.0, 0.35, 0.65, 0.0],
            Self::Cm | Self::Mf => [0.0, 0.0, 1.0, 0.0],
            Self::Am => [0.0, 0.0, 0.65, 0.35],
            Self::Lw | Self::Rw => [0.0, 0.0, 0.35, 0.65],
            Self::St | Self::Fw => [0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Positions a similarity cohort for this code may include. Adjacent
    /// roles are comparable; a goalkeeper is only comparable to another
    /// goalkeeper.
    pub fn compatible(self) -> &'static [PositionCode] {
        use PositionCode as P;
        match self {
            P::Gk => &[P::Gk],
            P::Cb => &[P::Cb, P::Df, P::Dm],
            P::Lb => &[P::Lb, P::Wb, P::Df, P::Lw],
            P::Rb => &[P::Rb, P::Wb, P::Df, P::Rw],
            P::Wb => &[P::Wb, P::Lb, P::Rb, P::Lw, P::Rw],
            P::Dm => &[P::Dm, P::Cb, P::Cm, P::Mf],
            P::Cm => &[P::Cm, P::Dm, P::Am, P::Mf],
            P::Am => &[P::Am, P::Cm, P::Lw, P::Rw, P::St, P::Mf, P::Fw],
            P::Lw => &[P::Lw, P::Rw, P::Am, P::St, P::Fw],
            P::Rw => &[P::Rw, P::Lw, P::Am, P::St, P::Fw],
            P::St => &[P::St, P::Lw, P::Rw, P::Am, P::Fw],
            P::Df => &[P::Df, P::Cb, P::Lb, P::Rb, P::Wb],
            P::Mf => &[P::Mf, P::Dm, P::Cm, P::Am],
            P::Fw => &[P::Fw, P::Lw, P::Rw, P::St, P::Am],
        }
    }

    /// Concrete codes covered by a filter value. Group codes expand to
    /// their members; concrete codes stand for themselves.
    pub fn filter_expansion(self) -> Vec<PositionCode> {
        use PositionCode as P;
        match self {
            P::Df => vec![P::Df, P::Cb, P::Lb, P::Rb, P::Wb],
            P::Mf => vec![P::Mf, P::Dm, P::Cm, P::Am],
            P::Fw => vec![P::Fw, P::Lw, P::Rw, P::St],
            other => vec![other],
        }
    }

    /// Whether a metric scoped to `scopes` is meaningful for this code.
    pub fn in_scope(self, scopes: &[PositionGroup]) -> bool {
        scopes.contains(&self.group())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_weights_sum_to_one() {
        for raw in [
            "GK", "CB", "LB", "RB", "WB", "DM", "CM", "AM", "LW", "RW", "ST", "DF", "MF", "FW",
        ] {
            let code = PositionCode::from_code(raw).unwrap();
            let sum: f64 = code.group_weights().iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "{raw} weights sum to {sum}");
        }
    }

    #[test]
    fn hybrid_codes_straddle_two_groups() {
        let wb = PositionCode::Wb.group_weights();
        assert!(wb[1] > 0.0 && wb[2] > 0.0);
        let am = PositionCode::Am.group_weights();
        assert!(am[2] > 0.0 && am[3] > 0.0);
    }

    #[test]
    fn goalkeepers_only_compare_to_goalkeepers() {
        assert_eq!(PositionCode::Gk.compatible(), &[PositionCode::Gk]);
        assert!(!PositionCode::St.compatible().contains(&PositionCode::Gk));
    }

    #[test]
    fn provider_aliases_resolve() {
        assert_eq!(PositionCode::from_code("cf"), Some(PositionCode::St));
        assert_eq!(PositionCode::from_code("LWB"), Some(PositionCode::Wb));
        assert_eq!(PositionCode::from_code("sweeper"), None);
    }

    #[test]
    fn group_filters_expand() {
        let df = PositionCode::Df.filter_expansion();
        assert!(df.contains(&PositionCode::Cb));
        assert!(df.contains(&PositionCode::Wb));
        assert_eq!(PositionCode::St.filter_expansion(), vec![PositionCode::St]);
    }
}
