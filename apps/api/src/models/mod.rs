pub mod alert;
pub mod product;
pub mod report;
pub mod task;
