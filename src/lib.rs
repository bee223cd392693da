pub mod api;
pub mod config;
pub mod error;
pub mod llm;
pub mod search;
pub mod server;
pub mod shutdown;
pub mod steps;
pub mod store;
pub mod workflow;
