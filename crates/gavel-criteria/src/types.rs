use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::ConfigError;

/// Overall threshold used when the active profile is somehow missing.
/// Validated configs always resolve a profile; this keeps the accessor total.
const FALLBACK_OVERALL_THRESHOLD: f64 = 60.0;

/// A single named, weighted, thresholded evaluation dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Relative weight in the overall score, 0.0..=1.0
    pub weight: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Minimum acceptable score, 0..=100
    pub threshold: f64,
    /// Scoring question handed to the judge capability for this criterion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_prompt: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// A named quality profile selecting the overall acceptance threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriteriaProfile {
    pub overall_threshold: f64,
}

/// Display bounds for the three-level score bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrafficLightBounds {
    pub green_threshold: f64,
    pub orange_threshold: f64,
}

impl Default for TrafficLightBounds {
    fn default() -> Self {
        Self {
            green_threshold: 70.0,
            orange_threshold: 40.0,
        }
    }
}

/// The full judge configuration: criteria in declaration order, quality
/// profiles, feature toggles, and the refinement budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CriteriaConfig {
    pub criteria: Vec<Criterion>,
    pub profiles: HashMap<String, CriteriaProfile>,
    pub active_profile: String,
    #[serde(default = "default_max_iterations")]
    pub max_refinement_iterations: u32,
    #[serde(default = "default_true")]
    pub input_critique_enabled: bool,
    #[serde(default = "default_true")]
    pub feedback_loop_enabled: bool,
    #[serde(default)]
    pub traffic_light: TrafficLightBounds,
}

fn default_max_iterations() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

impl CriteriaConfig {
    /// Enabled criteria in declaration order.
    pub fn enabled_criteria(&self) -> impl Iterator<Item = &Criterion> {
        self.criteria.iter().filter(|c| c.enabled)
    }

    /// Sum of enabled criteria weights.
    pub fn enabled_weight(&self) -> f64 {
        self.enabled_criteria().map(|c| c.weight).sum()
    }

    /// The active profile's overall acceptance threshold.
    pub fn active_threshold(&self) -> f64 {
        self.profiles
            .get(&self.active_profile)
            .map(|p| p.overall_threshold)
            .unwrap_or(FALLBACK_OVERALL_THRESHOLD)
    }

    pub fn get_criterion(&self, name: &str) -> Option<&Criterion> {
        self.criteria.iter().find(|c| c.name == name)
    }

    /// Check every structural invariant, reporting the first violation with
    /// its field path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for criterion in &self.criteria {
            if !seen.insert(criterion.name.as_str()) {
                return Err(ConfigError::DuplicateCriterion {
                    name: criterion.name.clone(),
                });
            }
            if !(0.0..=1.0).contains(&criterion.weight) {
                return Err(ConfigError::WeightOutOfRange {
                    criterion: criterion.name.clone(),
                    weight: criterion.weight,
                });
            }
            if !(0.0..=100.0).contains(&criterion.threshold) {
                return Err(ConfigError::ThresholdOutOfRange {
                    criterion: criterion.name.clone(),
                    threshold: criterion.threshold,
                });
            }
        }

        if self.enabled_weight() <= 0.0 {
            return Err(ConfigError::ZeroEnabledWeight);
        }

        for (name, profile) in &self.profiles {
            if !(0.0..=100.0).contains(&profile.overall_threshold) {
                return Err(ConfigError::ProfileThresholdOutOfRange {
                    profile: name.clone(),
                    threshold: profile.overall_threshold,
                });
            }
        }

        if !self.profiles.contains_key(&self.active_profile) {
            return Err(ConfigError::UnknownActiveProfile {
                profile: self.active_profile.clone(),
            });
        }

        let bounds = self.traffic_light;
        if bounds.orange_threshold < 0.0 || bounds.green_threshold <= bounds.orange_threshold {
            return Err(ConfigError::InvalidTrafficLight {
                green: bounds.green_threshold,
                orange: bounds.orange_threshold,
            });
        }

        Ok(())
    }
}

impl Default for CriteriaConfig {
    /// The stock configuration shipped with gavel: four output criteria and
    /// three quality profiles, moderate active.
    fn default() -> Self {
        let criterion = |name: &str, description: &str, weight: f64, threshold: f64| Criterion {
            name: name.to_string(),
            description: description.to_string(),
            weight,
            enabled: true,
            threshold,
            evaluation_prompt: None,
        };

        let mut profiles = HashMap::new();
        profiles.insert(
            "strict".to_string(),
            CriteriaProfile {
                overall_threshold: 80.0,
            },
        );
        profiles.insert(
            "moderate".to_string(),
            CriteriaProfile {
                overall_threshold: 65.0,
            },
        );
        profiles.insert(
            "lenient".to_string(),
            CriteriaProfile {
                overall_threshold: 50.0,
            },
        );

        Self {
            criteria: vec![
                criterion(
                    "accuracy",
                    "Factual correctness of the response",
                    0.3,
                    70.0,
                ),
                criterion(
                    "relevance",
                    "How directly the response addresses the question",
                    0.3,
                    70.0,
                ),
                criterion("clarity", "Readability and structure", 0.2, 60.0),
                criterion(
                    "completeness",
                    "Coverage of every part of the question",
                    0.2,
                    60.0,
                ),
            ],
            profiles,
            active_profile: "moderate".to_string(),
            max_refinement_iterations: 2,
            input_critique_enabled: true,
            feedback_loop_enabled: true,
            traffic_light: TrafficLightBounds::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CriteriaConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.active_threshold(), 65.0);
        assert_eq!(config.enabled_criteria().count(), 4);
    }

    #[test]
    fn test_enabled_criteria_keeps_declaration_order() {
        let mut config = CriteriaConfig::default();
        config.criteria[1].enabled = false;

        let names: Vec<&str> = config.enabled_criteria().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["accuracy", "clarity", "completeness"]);
    }

    #[test]
    fn test_validate_rejects_zero_enabled_weight() {
        let mut config = CriteriaConfig::default();
        for criterion in &mut config.criteria {
            criterion.enabled = false;
        }
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroEnabledWeight)
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_profile() {
        let mut config = CriteriaConfig::default();
        config.active_profile = "nonexistent".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownActiveProfile { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_weight() {
        let mut config = CriteriaConfig::default();
        config.criteria[0].weight = 1.5;
        let err = config.validate().unwrap_err();
        assert_eq!(err.field(), "criteria[accuracy].weight");
    }

    #[test]
    fn test_validate_rejects_inverted_traffic_light() {
        let mut config = CriteriaConfig::default();
        config.traffic_light = TrafficLightBounds {
            green_threshold: 40.0,
            orange_threshold: 70.0,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTrafficLight { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let mut config = CriteriaConfig::default();
        let copy = config.criteria[0].clone();
        config.criteria.push(copy);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateCriterion { .. })
        ));
    }
}
