// Alert evaluation: rules, cooldown markers, delivery and the consuming loop
pub mod cooldown;
pub mod evaluator;
pub mod notifier;
pub mod rules;

pub use cooldown::{cooldown_key, RateLimitError, RateLimitStore};
pub use evaluator::{AlertEvaluator, EvaluationReport, EvaluatorError};
pub use notifier::{LogNotifier, Notifier, NotifyError};
