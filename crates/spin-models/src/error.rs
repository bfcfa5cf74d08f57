//! Model validation errors.

use thiserror::Error;

use crate::stage::Stage;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Unsupported frame count {0}: must be one of 24, 36, 72")]
    UnsupportedFrameCount(u32),

    #[error("Illegal stage transition {from} -> {to}")]
    IllegalTransition { from: Stage, to: Stage },

    #[error("Job record is terminal ({0}) and cannot change")]
    Terminal(Stage),
}
