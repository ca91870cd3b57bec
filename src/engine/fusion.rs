//! Combining neural and language-model scores.
//!
//! Each step gives, per candidate, the neural probability `p`, the LM
//! log-probability `lm` and the step gate `g`:
//!
//! ```text
//! Shallow     g * ln p + (1 - g) * lm
//! Mixture     ln(g * p + (1 - g) * exp(lm))
//! Normalized  log_softmax over the parent's shortlist of the Shallow score
//! ```
//!
//! `g = 1` trusts the neural model alone; `g = 0` trusts the LM alone.

use serde::{Deserialize, Serialize};

/// Score combination policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fusion {
    /// Gate-weighted sum of log-probabilities.
    #[default]
    Shallow,
    /// Gate-weighted mixture of probabilities.
    Mixture,
    /// Shallow score renormalized over each parent's candidates.
    Normalized,
}

impl Fusion {
    /// Combined log-score of one candidate before any normalization.
    #[inline]
    pub fn combine(self, neural_log_prob: f32, lm_log_prob: f32, gate: f32) -> f32 {
        match self {
            Self::Shallow | Self::Normalized => {
                // A zero weight must silence its term even when it is -inf.
                let neural = if gate == 0.0 { 0.0 } else { gate * neural_log_prob };
                let lm = if gate == 1.0 { 0.0 } else { (1.0 - gate) * lm_log_prob };
                neural + lm
            }
            Self::Mixture => weighted_log_sum_exp(neural_log_prob, lm_log_prob, gate.clamp(0.0, 1.0)),
        }
    }

    /// Whether scores are renormalized over each parent's shortlist.
    pub fn is_normalized(self) -> bool {
        matches!(self, Self::Normalized)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shallow => "shallow",
            Self::Mixture => "mixture",
            Self::Normalized => "normalized",
        }
    }
}

impl std::str::FromStr for Fusion {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shallow" => Ok(Self::Shallow),
            "mixture" => Ok(Self::Mixture),
            "normalized" => Ok(Self::Normalized),
            other => Err(crate::error::Error::Config(format!(
                "unknown fusion `{other}` (expected shallow, mixture or normalized)"
            ))),
        }
    }
}

/// `ln(g * e^x + (1 - g) * e^y)`, evaluated without overflow.
pub fn weighted_log_sum_exp(x: f32, y: f32, g: f32) -> f32 {
    if x == f32::NEG_INFINITY && y == f32::NEG_INFINITY {
        return f32::NEG_INFINITY;
    }
    if x > y {
        x + (g + (1.0 - g) * (y - x).exp()).ln()
    } else {
        y + ((1.0 - g) + g * (x - y).exp()).ln()
    }
}

/// `ln(sum(e^v))` over `values`; `-inf` for an empty or all `-inf` slice.
pub fn log_sum_exp(values: &[f32]) -> f32 {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return f32::NEG_INFINITY;
    }
    let sum: f32 = values.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_shallow() {
        let f = Fusion::Shallow;
        assert!(close(f.combine(-1.0, -3.0, 0.5), -2.0));
        assert!(close(f.combine(-1.0, -3.0, 1.0), -1.0));
        assert!(close(f.combine(-1.0, -3.0, 0.0), -3.0));
        assert!(close(f.combine(f32::NEG_INFINITY, -3.0, 0.0), -3.0));
        assert!(close(f.combine(-1.0, f32::NEG_INFINITY, 1.0), -1.0));
    }

    #[test]
    fn test_mixture_matches_direct_formula() {
        let (p, q, g) = (0.6f32, 0.1f32, 0.3f32);
        let expected = (g * p + (1.0 - g) * q).ln();
        assert!(close(Fusion::Mixture.combine(p.ln(), q.ln(), g), expected));
        // symmetric branch
        assert!(close(Fusion::Mixture.combine(q.ln(), p.ln(), g), (g * q + (1.0 - g) * p).ln()));
    }

    #[test]
    fn test_mixture_extremes() {
        assert!(close(Fusion::Mixture.combine(-2.0, -1000.0, 1.0), -2.0));
        assert_eq!(
            Fusion::Mixture.combine(f32::NEG_INFINITY, f32::NEG_INFINITY, 0.5),
            f32::NEG_INFINITY
        );
        // gates outside [0, 1] are clamped
        assert!(close(Fusion::Mixture.combine(-2.0, -5.0, 1.7), -2.0));
    }

    #[test]
    fn test_log_sum_exp() {
        let values = [0.5f32.ln(), 0.25f32.ln(), 0.25f32.ln()];
        assert!(close(log_sum_exp(&values), 0.0));
        assert_eq!(log_sum_exp(&[]), f32::NEG_INFINITY);
    }

    #[test]
    fn test_parse() {
        assert_eq!("mixture".parse::<Fusion>().unwrap(), Fusion::Mixture);
        assert!("linear".parse::<Fusion>().is_err());
        assert!(Fusion::Normalized.is_normalized());
        assert_eq!(Fusion::Shallow.as_str(), "shallow");
    }
}
