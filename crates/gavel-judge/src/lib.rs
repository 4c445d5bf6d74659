mod engine;
mod evaluation;

pub use engine::{CriterionCallback, EvaluationError, JudgeEngine};
pub use evaluation::{CriterionResult, Evaluation, TrafficLight};
