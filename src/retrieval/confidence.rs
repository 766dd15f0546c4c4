//! Retrieval confidence policy
//!
//! Buckets the best similarity score, looks at the gap between the top two
//! results, at lexical-match presence and at how many candidates survived
//! reranking, and produces a label used by the gate and the answer
//! generator. Reasons are captured verbatim for the debug channel.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ConfidenceLevel {
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceReport {
    pub level: ConfidenceLevel,
    pub reasons: Vec<String>,
}

/// Score thresholds. Kept as one named object so the buckets can be tuned
/// and tested in isolation.
#[derive(Debug, Clone)]
pub struct ConfidencePolicy {
    pub high_score: f32,
    pub medium_score: f32,
    pub low_score: f32,
    pub floor_score: f32,
    pub distinctive_gap: f32,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            high_score: 0.85,
            medium_score: 0.75,
            low_score: 0.65,
            floor_score: 0.50,
            distinctive_gap: 0.15,
        }
    }
}

impl ConfidencePolicy {
    /// Evaluate retrieval quality.
    ///
    /// `best` and `second` are the top two similarity scores (if any),
    /// `has_lexical` marks a full-text hit among candidates and
    /// `survivors` counts results left after reranking.
    pub fn evaluate(
        &self,
        best: Option<f32>,
        second: Option<f32>,
        has_lexical: bool,
        survivors: usize,
    ) -> ConfidenceReport {
        let mut reasons = Vec::new();

        let Some(best) = best else {
            return ConfidenceReport {
                level: ConfidenceLevel::None,
                reasons: vec!["no candidates retrieved".to_string()],
            };
        };
        if survivors == 0 {
            return ConfidenceReport {
                level: ConfidenceLevel::None,
                reasons: vec!["no candidates survived reranking".to_string()],
            };
        }

        let mut level = if best >= self.high_score {
            reasons.push(format!("best score {best:.3} >= {:.2}", self.high_score));
            ConfidenceLevel::High
        } else if best >= self.medium_score {
            reasons.push(format!("best score {best:.3} >= {:.2}", self.medium_score));
            ConfidenceLevel::Medium
        } else if best >= self.low_score {
            reasons.push(format!("best score {best:.3} >= {:.2}", self.low_score));
            ConfidenceLevel::Low
        } else if best >= self.floor_score {
            reasons.push(format!("best score {best:.3} above floor {:.2}", self.floor_score));
            ConfidenceLevel::Low
        } else {
            reasons.push(format!("best score {best:.3} below floor {:.2}", self.floor_score));
            ConfidenceLevel::None
        };

        if let Some(second) = second {
            let gap = best - second;
            if gap >= self.distinctive_gap && level < ConfidenceLevel::High {
                reasons.push(format!("distinctive gap {gap:.3} between top results"));
                level = bump(level);
            }
        }

        if has_lexical && level < ConfidenceLevel::High {
            reasons.push("lexical match present".to_string());
            level = bump(level);
        }

        if survivors < 2 && level > ConfidenceLevel::Low {
            reasons.push(format!("only {survivors} result(s) survived reranking"));
            level = ConfidenceLevel::Low;
        }

        ConfidenceReport { level, reasons }
    }
}

fn bump(level: ConfidenceLevel) -> ConfidenceLevel {
    match level {
        ConfidenceLevel::None => ConfidenceLevel::Low,
        ConfidenceLevel::Low => ConfidenceLevel::Medium,
        ConfidenceLevel::Medium | ConfidenceLevel::High => ConfidenceLevel::High,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ConfidencePolicy {
        ConfidencePolicy::default()
    }

    #[test]
    fn test_no_candidates_is_none() {
        let report = policy().evaluate(None, None, false, 0);
        assert_eq!(report.level, ConfidenceLevel::None);
        assert_eq!(report.reasons, vec!["no candidates retrieved"]);
    }

    #[test]
    fn test_score_buckets() {
        assert_eq!(policy().evaluate(Some(0.90), None, false, 5).level, ConfidenceLevel::High);
        assert_eq!(policy().evaluate(Some(0.80), None, false, 5).level, ConfidenceLevel::Medium);
        assert_eq!(policy().evaluate(Some(0.70), None, false, 5).level, ConfidenceLevel::Low);
        assert_eq!(policy().evaluate(Some(0.55), None, false, 5).level, ConfidenceLevel::Low);
        assert_eq!(policy().evaluate(Some(0.40), None, false, 5).level, ConfidenceLevel::None);
    }

    #[test]
    fn test_distinctive_gap_bumps() {
        // 0.80 is Medium; a 0.20 gap over #2 lifts it to High
        let report = policy().evaluate(Some(0.80), Some(0.60), false, 5);
        assert_eq!(report.level, ConfidenceLevel::High);
        assert!(report.reasons.iter().any(|r| r.contains("distinctive gap")));
    }

    #[test]
    fn test_lexical_match_bumps() {
        let report = policy().evaluate(Some(0.70), Some(0.68), true, 5);
        assert_eq!(report.level, ConfidenceLevel::Medium);
    }

    #[test]
    fn test_lone_survivor_caps_at_low() {
        let report = policy().evaluate(Some(0.90), None, false, 1);
        assert_eq!(report.level, ConfidenceLevel::Low);
        assert!(report.reasons.iter().any(|r| r.contains("survived reranking")));
    }

    #[test]
    fn test_zero_survivors_is_none() {
        let report = policy().evaluate(Some(0.90), None, true, 0);
        assert_eq!(report.level, ConfidenceLevel::None);
    }

    #[test]
    fn test_reasons_are_verbatim_captured() {
        let report = policy().evaluate(Some(0.86), Some(0.5), true, 4);
        assert!(!report.reasons.is_empty());
        assert!(report.reasons[0].contains("0.860"));
    }
}
