pub mod aggregation;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod runner;
pub mod session;
pub mod state;

pub use aggregation::AggregationEngine;
pub use error::QuizError;
pub use runner::{SessionEngine, SessionHandle};

pub fn build_state(config: &config::Config) -> anyhow::Result<state::AppState> {
    state::AppState::from_config(config)
}
