use serde::{Deserialize, Serialize};

use gavel_criteria::TrafficLightBounds;

/// Share of a criterion's pass threshold below which its own light turns
/// red. Per-criterion lights are display-only; regeneration uses the pass
/// threshold alone.
const CRITERION_ORANGE_FRACTION: f64 = 0.5;

/// Three-level qualitative bucket for a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficLight {
    Green,
    Orange,
    Red,
}

impl TrafficLight {
    /// Bucket a score against a bound pair. Green is inclusive at its lower
    /// bound, red is everything strictly below orange; the buckets cover the
    /// whole range with no overlap.
    pub fn grade(score: f64, green_threshold: f64, orange_threshold: f64) -> Self {
        if score >= green_threshold {
            Self::Green
        } else if score >= orange_threshold {
            Self::Orange
        } else {
            Self::Red
        }
    }

    pub fn for_overall(score: f64, bounds: &TrafficLightBounds) -> Self {
        Self::grade(score, bounds.green_threshold, bounds.orange_threshold)
    }

    pub fn for_criterion(score: f64, threshold: f64) -> Self {
        Self::grade(score, threshold, threshold * CRITERION_ORANGE_FRACTION)
    }
}

impl std::fmt::Display for TrafficLight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Green => write!(f, "green"),
            Self::Orange => write!(f, "orange"),
            Self::Red => write!(f, "red"),
        }
    }
}

/// Score for a single criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub name: String,
    pub score: f64,
    pub weight: f64,
    pub threshold: f64,
    pub passed: bool,
    pub feedback: String,
    pub traffic_light: TrafficLight,
}

/// Aggregate judgement of one piece of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub overall_score: f64,
    /// Per-criterion results in criteria declaration order.
    pub criteria: Vec<CriterionResult>,
    pub feedback: String,
    pub should_regenerate: bool,
    /// One entry per failing criterion, formatted "<name>: <feedback>".
    pub suggestions: Vec<String>,
    pub traffic_light: TrafficLight,
}

impl Evaluation {
    pub fn passed(&self) -> bool {
        !self.should_regenerate
    }

    /// Feedback plus suggestions, composed as context for a regeneration.
    pub fn refinement_context(&self) -> String {
        if self.suggestions.is_empty() {
            return self.feedback.clone();
        }
        let mut context = self.feedback.clone();
        context.push('\n');
        for suggestion in &self.suggestions {
            context.push_str("\n- ");
            context.push_str(suggestion);
        }
        context
    }

    /// Short description for logging.
    pub fn summary(&self) -> String {
        let passed = self.criteria.iter().filter(|c| c.passed).count();
        format!(
            "{:.1} {} ({}/{} criteria passed)",
            self.overall_score,
            self.traffic_light,
            passed,
            self.criteria.len()
        )
    }
}
