//! # Complexity Router Module
//!
//! Scores a query's complexity from its text alone and classifies it into
//! one of three buckets, which map one-to-one onto inference tiers. The
//! score combines cue-phrase matches against three fixed pattern sets with
//! structural signals (sentence count, conditionals, multi-part markers,
//! length). Assessment is a pure function of the text and the configured
//! thresholds: no I/O, no caching, identical input always yields an
//! identical assessment.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::RoutingConfig;
use crate::registry::Tier;

/// Weight applied per matched simple cue (pulls the score down).
const SIMPLE_CUE_WEIGHT: f64 = -1.5;
/// Weight applied per matched moderate cue.
const MODERATE_CUE_WEIGHT: f64 = 2.5;
/// Weight applied per matched complex cue.
const COMPLEX_CUE_WEIGHT: f64 = 6.5;
/// Weight per sentence beyond the first.
const EXTRA_SENTENCE_WEIGHT: f64 = 0.75;
/// Weight per conditional clause marker.
const CONDITIONAL_WEIGHT: f64 = 1.0;
/// Weight per multi-part enumeration marker.
const MULTIPART_WEIGHT: f64 = 1.25;
/// Weight added for every 25 words of query text.
const LENGTH_WEIGHT: f64 = 0.5;
/// Baseline score before any signal is applied.
const BASE_SCORE: f64 = 1.0;

/// Cue phrases typical of lookup-style questions.
static SIMPLE_CUES: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_cues(&[
        r"^what\s+is\b",
        r"^what\s+are\b",
        r"^who\s+is\b",
        r"^when\s+(is|was)\b",
        r"^where\s+is\b",
        r"\bdefine\b",
        r"^list\b",
        r"^name\s+the\b",
    ])
});

/// Cue phrases asking for explanation or comparison.
static MODERATE_CUES: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_cues(&[
        r"\bexplain\b",
        r"\bhow\s+(does|do|did|would)\b",
        r"\bdescribe\b",
        r"\bsummari[sz]e\b",
        r"\bcompare\b",
        r"\bwhy\s+(does|do|is|are)\b",
        r"\bwalk\s+me\s+through\b",
    ])
});

/// Cue phrases asking for analysis or multi-step reasoning.
static COMPLEX_CUES: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_cues(&[
        r"\banaly[sz]e\b",
        r"\btrade-?offs?\b",
        r"\bevaluate\b",
        r"\bdesign\b",
        r"\barchitect\b",
        r"\boptimi[sz]e\b",
        r"\bprove\b",
        r"\bderive\b",
        r"\bstep\s+by\s+step\b",
        r"\bpros\s+and\s+cons\b",
        r"\bimplications\b",
    ])
});

/// Markers of conditional or hypothetical phrasing.
static CONDITIONAL_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(if|unless|assuming|considering|depending|given\s+that)\b").unwrap()
});

/// Markers of multi-part requests (enumerations, sequencing words).
static MULTIPART_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\b(first|second|third|finally|additionally)\b|\d+\.|\balso\b|\bas\s+well\s+as\b|;)").unwrap()
});

fn compile_cues(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| Regex::new(p).unwrap()).collect()
}

/// Complexity classification for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityBucket {
    Simple,
    Moderate,
    Complex,
}

impl ComplexityBucket {
    /// Buckets map deterministically onto tiers.
    pub fn tier(&self) -> Tier {
        match self {
            ComplexityBucket::Simple => Tier::Fast,
            ComplexityBucket::Moderate => Tier::Balanced,
            ComplexityBucket::Complex => Tier::Powerful,
        }
    }
}

/// Structural features and cue matches that contributed to a score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexitySignals {
    /// Cue patterns that matched, as pattern strings
    pub matched_cues: Vec<String>,
    /// Number of sentences detected
    pub sentence_count: usize,
    /// Number of words in the query
    pub word_count: usize,
    /// Conditional clause markers found
    pub conditional_count: usize,
    /// Multi-part enumeration markers found
    pub multipart_count: usize,
}

/// Derived complexity for one query. Recomputed fresh per query; never
/// cached across different texts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityAssessment {
    /// Weighted numeric score
    pub score: f64,
    /// Bucket the score maps to
    pub bucket: ComplexityBucket,
    /// Signals that produced the score
    pub signals: ComplexitySignals,
}

/// Classifies query text into a complexity bucket via fixed thresholds.
pub struct ComplexityRouter {
    /// Scores at or below this value classify as simple
    simple_max: f64,
    /// Scores at or below this value classify as moderate
    moderate_max: f64,
}

impl ComplexityRouter {
    pub fn new(config: &RoutingConfig) -> Self {
        Self {
            simple_max: config.simple_max,
            moderate_max: config.moderate_max,
        }
    }

    /// Scores the query and classifies it.
    ///
    /// Empty text scores zero and lands in the simple bucket. That default
    /// is preserved from the observed configuration but is dubious enough
    /// to warrant a log line; the orchestrator rejects empty queries before
    /// they reach this point.
    pub fn assess(&self, query_text: &str) -> ComplexityAssessment {
        let trimmed = query_text.trim();
        if trimmed.is_empty() {
            warn!("Complexity assessment requested for empty query text; treating as simple");
            return ComplexityAssessment {
                score: 0.0,
                bucket: ComplexityBucket::Simple,
                signals: ComplexitySignals {
                    matched_cues: Vec::new(),
                    sentence_count: 0,
                    word_count: 0,
                    conditional_count: 0,
                    multipart_count: 0,
                },
            };
        }

        let lowered = trimmed.to_lowercase();
        let mut score = BASE_SCORE;
        let mut matched_cues = Vec::new();

        for (cues, weight) in [
            (&*SIMPLE_CUES, SIMPLE_CUE_WEIGHT),
            (&*MODERATE_CUES, MODERATE_CUE_WEIGHT),
            (&*COMPLEX_CUES, COMPLEX_CUE_WEIGHT),
        ] {
            for cue in cues {
                if cue.is_match(&lowered) {
                    score += weight;
                    matched_cues.push(cue.as_str().to_string());
                }
            }
        }

        // Structural signals
        let sentence_count = trimmed
            .split(['.', '?', '!'])
            .filter(|s| !s.trim().is_empty())
            .count();
        let word_count = trimmed.split_whitespace().count();
        let conditional_count = CONDITIONAL_MARKERS.find_iter(&lowered).count();
        let multipart_count = MULTIPART_MARKERS.find_iter(&lowered).count();

        score += sentence_count.saturating_sub(1) as f64 * EXTRA_SENTENCE_WEIGHT;
        score += conditional_count as f64 * CONDITIONAL_WEIGHT;
        score += multipart_count as f64 * MULTIPART_WEIGHT;
        score += (word_count / 25) as f64 * LENGTH_WEIGHT;

        let score = score.max(0.0);

        ComplexityAssessment {
            score,
            bucket: self.bucket_for(score),
            signals: ComplexitySignals {
                matched_cues,
                sentence_count,
                word_count,
                conditional_count,
                multipart_count,
            },
        }
    }

    /// Maps a score to its bucket. Both thresholds are inclusive upper
    /// bounds, so a score exactly at a boundary resolves to the
    /// lower-complexity bucket.
    pub fn bucket_for(&self, score: f64) -> ComplexityBucket {
        if score <= self.simple_max {
            ComplexityBucket::Simple
        } else if score <= self.moderate_max {
            ComplexityBucket::Moderate
        } else {
            ComplexityBucket::Complex
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> ComplexityRouter {
        ComplexityRouter::new(&RoutingConfig {
            simple_max: 3.0,
            moderate_max: 7.0,
        })
    }

    #[test]
    fn lookup_question_is_simple() {
        let assessment = router().assess("What is X?");
        assert_eq!(assessment.bucket, ComplexityBucket::Simple);
        assert_eq!(assessment.bucket.tier(), Tier::Fast);
        assert!(!assessment.signals.matched_cues.is_empty());
    }

    #[test]
    fn explanation_request_is_moderate() {
        let assessment = router().assess("Explain how a B-tree stays balanced");
        assert_eq!(assessment.bucket, ComplexityBucket::Moderate);
        assert_eq!(assessment.bucket.tier(), Tier::Balanced);
    }

    #[test]
    fn analysis_request_is_complex() {
        let assessment =
            router().assess("Analyze the tradeoffs between X and Y considering Z");
        assert_eq!(assessment.bucket, ComplexityBucket::Complex);
        assert_eq!(assessment.bucket.tier(), Tier::Powerful);
        assert!(assessment.signals.conditional_count >= 1);
    }

    #[test]
    fn assessment_is_deterministic() {
        let r = router();
        let text = "Compare X and Y. Also, if Z applies, explain the implications.";
        let first = r.assess(text);
        let second = r.assess(text);
        assert_eq!(first.score, second.score);
        assert_eq!(first.bucket, second.bucket);
        assert_eq!(first.signals.matched_cues, second.signals.matched_cues);
        assert_eq!(first.signals.sentence_count, second.signals.sentence_count);
    }

    #[test]
    fn threshold_boundaries_resolve_to_lower_bucket() {
        let r = router();
        assert_eq!(r.bucket_for(3.0), ComplexityBucket::Simple);
        assert_eq!(r.bucket_for(3.0001), ComplexityBucket::Moderate);
        assert_eq!(r.bucket_for(7.0), ComplexityBucket::Moderate);
        assert_eq!(r.bucket_for(7.0001), ComplexityBucket::Complex);
    }

    #[test]
    fn empty_text_defaults_to_simple() {
        let assessment = router().assess("   ");
        assert_eq!(assessment.bucket, ComplexityBucket::Simple);
        assert_eq!(assessment.score, 0.0);
        assert_eq!(assessment.signals.word_count, 0);
    }

    #[test]
    fn structural_signals_escalate_long_multi_part_queries() {
        let text = "First, summarize the dataset. Second, compare the two models. \
                    Finally, if the difference is significant, describe what drives it.";
        let assessment = router().assess(text);
        assert!(assessment.signals.sentence_count >= 3);
        assert!(assessment.signals.multipart_count >= 2);
        assert_eq!(assessment.bucket, ComplexityBucket::Complex);
    }
}
