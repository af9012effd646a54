pub mod comparison;
pub mod dispatch;
pub mod generator;
pub mod handlers;
pub mod orchestrator;
pub mod params;
pub mod prompts;
