use std::sync::Arc;
use tracing::{debug, info};

use gavel_criteria::CriteriaConfig;
use gavel_provider::{CapabilityError, ScoreRequest, Scorer};

use crate::{CriterionResult, Evaluation, TrafficLight};

/// Callback invoked with each criterion result as soon as it lands, ahead of
/// the complete evaluation.
pub type CriterionCallback = Arc<dyn Fn(&CriterionResult) + Send + Sync>;

/// Scores content against a criteria set, one judge call per criterion.
#[derive(Clone)]
pub struct JudgeEngine {
    scorer: Arc<dyn Scorer>,
}

impl JudgeEngine {
    pub fn new(scorer: Arc<dyn Scorer>) -> Self {
        Self { scorer }
    }

    /// Evaluate content against the enabled criteria of `config`, in
    /// declaration order.
    ///
    /// Fails atomically: if any single scoring call fails, no Evaluation is
    /// produced and results already streamed through the callback are void.
    pub async fn evaluate(
        &self,
        content: &str,
        config: &CriteriaConfig,
        on_result: Option<CriterionCallback>,
    ) -> Result<Evaluation, EvaluationError> {
        let criteria: Vec<_> = config.enabled_criteria().collect();
        let total_weight: f64 = criteria.iter().map(|c| c.weight).sum();

        // Degenerate sets are rejected before any capability call is spent.
        // The registry validates this on load; re-checked here.
        if criteria.is_empty() || total_weight <= 0.0 {
            return Err(EvaluationError::DegenerateCriteria);
        }

        debug!(criteria = criteria.len(), "Starting evaluation");

        let mut results = Vec::with_capacity(criteria.len());
        let mut weighted_sum = 0.0;

        for &criterion in &criteria {
            let outcome = self
                .scorer
                .score(ScoreRequest { content, criterion })
                .await
                .map_err(|source| EvaluationError::Scoring {
                    criterion: criterion.name.clone(),
                    source,
                })?;

            let score = outcome.score.clamp(0.0, 100.0);
            let result = CriterionResult {
                name: criterion.name.clone(),
                score,
                weight: criterion.weight,
                threshold: criterion.threshold,
                passed: score >= criterion.threshold,
                feedback: outcome.feedback,
                traffic_light: TrafficLight::for_criterion(score, criterion.threshold),
            };

            debug!(
                criterion = %result.name,
                score = result.score,
                passed = result.passed,
                "Criterion scored"
            );

            if let Some(ref callback) = on_result {
                callback(&result);
            }

            weighted_sum += score * criterion.weight;
            results.push(result);
        }

        let overall = weighted_sum / total_weight;
        let overall_threshold = config.active_threshold();
        let any_failed = results.iter().any(|r| !r.passed);
        // Strict OR: one failing criterion forces regeneration even when the
        // weighted overall clears the profile threshold.
        let should_regenerate = overall < overall_threshold || any_failed;

        let suggestions: Vec<String> = results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| format!("{}: {}", r.name, r.feedback))
            .collect();

        let feedback = if suggestions.is_empty() {
            format!("All {} criteria passed.", results.len())
        } else {
            let failing: Vec<&str> = results
                .iter()
                .filter(|r| !r.passed)
                .map(|r| r.name.as_str())
                .collect();
            format!(
                "{} of {} criteria below threshold: {}.",
                failing.len(),
                results.len(),
                failing.join(", ")
            )
        };

        let evaluation = Evaluation {
            overall_score: (overall * 100.0).round() / 100.0,
            criteria: results,
            feedback,
            should_regenerate,
            suggestions,
            traffic_light: TrafficLight::for_overall(overall, &config.traffic_light),
        };

        info!(summary = %evaluation.summary(), regenerate = should_regenerate, "Evaluation complete");
        Ok(evaluation)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("no enabled criteria with positive weight")]
    DegenerateCriteria,

    #[error("scoring '{criterion}' failed: {source}")]
    Scoring {
        criterion: String,
        source: CapabilityError,
    },
}

impl EvaluationError {
    /// Whether the failure came from the capability boundary (and is
    /// therefore worth one retry) rather than from configuration.
    pub fn is_capability(&self) -> bool {
        matches!(self, Self::Scoring { .. })
    }
}
