pub mod handler;
pub mod types;
