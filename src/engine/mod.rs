//! Core engine — the aggregate → evaluate → train → sweep feedback loop.

pub mod aggregator;
pub mod evaluator;
pub mod learner;
pub mod lifecycle;

pub use aggregator::ConsensusAggregator;
pub use evaluator::OutcomeEvaluator;
pub use learner::WeightLearner;
pub use lifecycle::LifecycleManager;
