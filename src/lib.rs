pub mod app;
pub mod cli;
pub mod config;
pub mod quotes;
pub mod storage;
pub mod sync;
pub mod ui;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use quotes::{Quote, QuoteRepository};
