//! Session error type.
//!
//! Stale frame/variable handles are deliberately not an error: a request
//! citing one gets an empty or default success response, which is what DAP
//! clients expect after a stop invalidated their references.

use gdbmi::MiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid request arguments: {0}")]
    InvalidArgs(String),
    #[error("no active debug session")]
    NoSession,
    #[error("unsupported evaluate context")]
    UnsupportedEvaluateContext,
    #[error(transparent)]
    Mi(#[from] MiError),
    #[error("DAP transport error: {0}")]
    Dap(#[from] dap::errors::ServerError),
    #[error("failed to build async runtime: {0}")]
    Runtime(std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
