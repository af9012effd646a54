pub mod handlers;
pub mod launcher;
pub mod registry;
pub mod scheduler;
pub mod selector;
