//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("peer not configured: {0}")]
    UnknownPeer(String),

    #[error("invalid resource configuration: {0}")]
    InvalidResource(String),

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("dispatcher channel closed")]
    ChannelClosed,

    #[error("state error: {0}")]
    State(#[from] gridsched_state::StateError),

    #[error("expression error: {0}")]
    Expr(#[from] gridsched_core::ExprError),

    #[error("config error: {0}")]
    Config(#[from] gridsched_core::ConfigError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
