//! Scriptly
//!
//! Administrators register command-line scripts together with a description
//! of their arguments; users get generated forms, submit them, and the
//! server validates the values, builds the command line and runs it as a job
//! whose output and files are kept for later viewing, resubmission or rerun.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod forms;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod repository;
pub mod runner;
pub mod services;
pub mod storage;
pub mod text;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
