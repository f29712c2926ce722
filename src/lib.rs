pub mod config;
pub mod monitoring;
pub mod store;
pub mod utils;
