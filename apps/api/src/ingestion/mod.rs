pub mod coordinator;
pub mod handlers;
pub mod payload;
