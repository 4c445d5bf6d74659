use thiserror::Error;

/// Criteria configuration rejected during validation. Every variant names the
/// offending field so API callers can surface field-level detail.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("criteria[{name}]: duplicate criterion name")]
    DuplicateCriterion { name: String },

    #[error("criteria[{criterion}].weight: {weight} is outside 0.0..=1.0")]
    WeightOutOfRange { criterion: String, weight: f64 },

    #[error("criteria[{criterion}].threshold: {threshold} is outside 0..=100")]
    ThresholdOutOfRange { criterion: String, threshold: f64 },

    #[error("profiles.{profile}.overall_threshold: {threshold} is outside 0..=100")]
    ProfileThresholdOutOfRange { profile: String, threshold: f64 },

    #[error("active_profile: no profile named '{profile}'")]
    UnknownActiveProfile { profile: String },

    #[error("criteria: enabled criteria weights sum to zero")]
    ZeroEnabledWeight,

    #[error("traffic_light: green_threshold {green} must exceed orange_threshold {orange}, with orange >= 0")]
    InvalidTrafficLight { green: f64, orange: f64 },

    #[error("failed to read criteria file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse criteria file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    /// Path of the field that failed validation.
    pub fn field(&self) -> String {
        match self {
            Self::DuplicateCriterion { name } => format!("criteria[{name}].name"),
            Self::WeightOutOfRange { criterion, .. } => format!("criteria[{criterion}].weight"),
            Self::ThresholdOutOfRange { criterion, .. } => {
                format!("criteria[{criterion}].threshold")
            }
            Self::ProfileThresholdOutOfRange { profile, .. } => {
                format!("profiles.{profile}.overall_threshold")
            }
            Self::UnknownActiveProfile { .. } => "active_profile".to_string(),
            Self::ZeroEnabledWeight => "criteria".to_string(),
            Self::InvalidTrafficLight { .. } => "traffic_light".to_string(),
            Self::Io(_) | Self::Parse(_) => "<file>".to_string(),
        }
    }
}
