pub mod cache;
pub mod evaluator;
pub mod handlers;
