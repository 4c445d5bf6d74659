use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::info;

use crate::{ConfigError, CriteriaConfig, CriteriaProfile, Criterion, TrafficLightBounds};

/// Partial update merged onto the active configuration. Provided sections
/// replace their counterparts wholesale; omitted sections are untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CriteriaPatch {
    pub criteria: Option<Vec<Criterion>>,
    pub profiles: Option<HashMap<String, CriteriaProfile>>,
    pub active_profile: Option<String>,
    pub max_refinement_iterations: Option<u32>,
    pub input_critique_enabled: Option<bool>,
    pub feedback_loop_enabled: Option<bool>,
    pub traffic_light: Option<TrafficLightBounds>,
}

impl CriteriaPatch {
    fn apply(self, config: &mut CriteriaConfig) {
        if let Some(criteria) = self.criteria {
            config.criteria = criteria;
        }
        if let Some(profiles) = self.profiles {
            config.profiles = profiles;
        }
        if let Some(active_profile) = self.active_profile {
            config.active_profile = active_profile;
        }
        if let Some(max) = self.max_refinement_iterations {
            config.max_refinement_iterations = max;
        }
        if let Some(enabled) = self.input_critique_enabled {
            config.input_critique_enabled = enabled;
        }
        if let Some(enabled) = self.feedback_loop_enabled {
            config.feedback_loop_enabled = enabled;
        }
        if let Some(bounds) = self.traffic_light {
            config.traffic_light = bounds;
        }
    }
}

/// Holds the active, validated criteria configuration.
///
/// Readers take an `Arc` snapshot; an evaluation keeps using the snapshot it
/// captured even if the config is updated mid-flight. Updates validate a
/// merged copy and swap it in atomically, so a rejected update leaves the
/// previous configuration authoritative.
pub struct CriteriaRegistry {
    current: RwLock<Arc<CriteriaConfig>>,
}

impl CriteriaRegistry {
    pub fn new(config: CriteriaConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(config)),
        })
    }

    /// Load and validate a TOML criteria file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: CriteriaConfig = toml::from_str(&content)?;
        info!(path = %path.display(), criteria = config.criteria.len(), "Loaded criteria configuration");
        Self::new(config)
    }

    /// The current configuration; copy-on-read.
    pub fn snapshot(&self) -> Arc<CriteriaConfig> {
        self.current.read().expect("criteria lock poisoned").clone()
    }

    pub fn active_threshold(&self) -> f64 {
        self.snapshot().active_threshold()
    }

    /// Enabled criteria in declaration order.
    pub fn enabled_criteria(&self) -> Vec<Criterion> {
        self.snapshot().enabled_criteria().cloned().collect()
    }

    /// Merge a partial update onto the current configuration and revalidate.
    /// All-or-nothing: a validation failure leaves the active config as-is.
    pub fn update(&self, patch: CriteriaPatch) -> Result<Arc<CriteriaConfig>, ConfigError> {
        let mut guard = self.current.write().expect("criteria lock poisoned");
        let mut next = (**guard).clone();
        patch.apply(&mut next);
        next.validate()?;
        let next = Arc::new(next);
        *guard = next.clone();
        info!(active_profile = %next.active_profile, "Criteria configuration updated");
        Ok(next)
    }
}
