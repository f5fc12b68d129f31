pub mod adapters;
pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod persistence;
pub mod signing;
pub mod strategy;

pub use config::AppConfig;
pub use error::{ExecutorError, Result};
pub use persistence::{IdempotencyStore, PositionStore, Stores};
pub use strategy::{ExecutionReport, Executor};
