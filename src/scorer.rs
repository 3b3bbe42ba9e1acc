// 📈 Risk Scorer - Edge and address scores on a 0..=100 scale
// Pure functions of their inputs: no clock, no randomness.

use crate::classifier::EvasionPattern;
use crate::config::ScoringConfig;
use serde::{Deserialize, Serialize};

pub const MAX_SCORE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
            RiskTier::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RiskScorer {
    config: ScoringConfig,
}

impl RiskScorer {
    pub fn new(config: ScoringConfig) -> Self {
        RiskScorer { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Saturating factor in volume_floor..=1 for amount relative to history
    ///
    /// An empty history means the amount is the whole known volume.
    pub fn volume_factor(&self, amount: f64, historical_volume: f64) -> f64 {
        let floor = self.config.volume_floor;
        if !amount.is_finite() || amount <= 0.0 {
            return floor;
        }

        let ratio = if historical_volume.is_finite() && historical_volume > 0.0 {
            amount / historical_volume
        } else {
            1.0
        };

        let saturation = 1.0 - (-self.config.volume_saturation * ratio).exp();
        floor + (1.0 - floor) * saturation
    }

    pub fn edge_score(&self, pattern: EvasionPattern, amount: f64, historical_volume: f64) -> f64 {
        let weight = pattern.base_severity(&self.config.weights);
        clamp_score(MAX_SCORE * weight * self.volume_factor(amount, historical_volume))
    }

    /// Non-increasing in distance; 0 when no designated address is reachable
    pub fn proximity_score(&self, distance: Option<u32>) -> f64 {
        match distance {
            Some(d) => clamp_score(MAX_SCORE * self.config.hop_decay.powi(d as i32)),
            None => 0.0,
        }
    }

    /// Combine proximity with the strongest incident flagged edge
    pub fn address_score<I>(&self, distance: Option<u32>, incident_edge_scores: I) -> f64
    where
        I: IntoIterator<Item = f64>,
    {
        if distance == Some(0) {
            return MAX_SCORE;
        }

        incident_edge_scores
            .into_iter()
            .fold(self.proximity_score(distance), f64::max)
    }

    pub fn tier(&self, score: f64) -> RiskTier {
        if score >= self.config.critical_threshold {
            RiskTier::Critical
        } else if score >= self.config.high_threshold {
            RiskTier::High
        } else if score >= self.config.medium_threshold {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, MAX_SCORE)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_factor_saturates() {
        let scorer = RiskScorer::default();

        let small = scorer.volume_factor(1.0, 1_000.0);
        let half = scorer.volume_factor(500.0, 1_000.0);
        let whole = scorer.volume_factor(1_000.0, 1_000.0);
        let outlier = scorer.volume_factor(1_000_000.0, 1_000.0);

        assert!(small >= 0.5 && small < half);
        assert!(half < whole);
        assert!(outlier <= 1.0);
        // Diminishing returns: 1000x the volume adds less than the first half did
        assert!(outlier - whole < half - small);
    }

    #[test]
    fn test_volume_factor_edge_cases() {
        let scorer = RiskScorer::default();
        assert_eq!(scorer.volume_factor(0.0, 100.0), 0.5);
        assert_eq!(scorer.volume_factor(f64::NAN, 100.0), 0.5);
        assert_eq!(scorer.volume_factor(10.0, 0.0), scorer.volume_factor(10.0, 10.0));
    }

    #[test]
    fn test_mixing_edge_outscores_direct_and_p2p() {
        let scorer = RiskScorer::default();
        let mixing = scorer.edge_score(EvasionPattern::Mixing, 10.0, 100.0);

        assert!(mixing > scorer.edge_score(EvasionPattern::Direct, 10.0, 100.0));
        assert!(mixing > scorer.edge_score(EvasionPattern::P2p, 10.0, 100.0));
    }

    #[test]
    fn test_whole_volume_mixing_is_critical() {
        let scorer = RiskScorer::default();
        let score = scorer.edge_score(EvasionPattern::Mixing, 5.0, 5.0);

        assert!(score > 97.0 && score <= MAX_SCORE);
        assert_eq!(scorer.tier(score), RiskTier::Critical);
    }

    #[test]
    fn test_proximity_decay_is_monotonic() {
        let scorer = RiskScorer::default();
        let scores: Vec<f64> = (0..6).map(|d| scorer.proximity_score(Some(d))).collect();

        assert_eq!(scores[0], MAX_SCORE);
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(scorer.proximity_score(None), 0.0);
    }

    #[test]
    fn test_address_score() {
        let scorer = RiskScorer::default();

        // Designated address is always at the maximum
        assert_eq!(scorer.address_score(Some(0), Vec::new()), MAX_SCORE);
        // Proximity dominates a weak edge
        assert_eq!(scorer.address_score(Some(1), vec![10.0]), 50.0);
        // A strong edge dominates weak proximity
        assert_eq!(scorer.address_score(Some(3), vec![70.0, 20.0]), 70.0);
        assert_eq!(scorer.address_score(None, Vec::new()), 0.0);
    }

    #[test]
    fn test_tiers() {
        let scorer = RiskScorer::default();
        assert_eq!(scorer.tier(95.0), RiskTier::Critical);
        assert_eq!(scorer.tier(60.0), RiskTier::High);
        assert_eq!(scorer.tier(45.0), RiskTier::Medium);
        assert_eq!(scorer.tier(0.0), RiskTier::Low);
    }
}
