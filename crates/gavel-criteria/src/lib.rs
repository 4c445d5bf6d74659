mod error;
mod registry;
mod types;

pub use error::ConfigError;
pub use registry::{CriteriaPatch, CriteriaRegistry};
pub use types::{Criterion, CriteriaConfig, CriteriaProfile, TrafficLightBounds};
