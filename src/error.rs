//! Error taxonomy for the agent core.
//!
//! Only two failure kinds escape the loop: a decision failure (the run
//! cannot safely continue without a trustworthy next action) and external
//! cancellation. Everything the tools produce is absorbed into the
//! iteration history so the next decision call can observe it.

use std::time::Duration;

use thiserror::Error;

/// The decision step failed or returned output that could not be parsed.
/// Always fatal for the run; never silently replaced with a default action.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("decision request failed: {0}")]
    Request(String),

    #[error("decision step timed out after {0:?}")]
    Timeout(Duration),

    #[error("empty response from model")]
    EmptyResponse,

    #[error("unparseable response, missing field '{field}': {response}")]
    MissingField { field: &'static str, response: String },

    #[error("invalid action '{0}' (must be one of: aws_cli, shell, file_edit, terraform_plan, terraform_apply, web_search, complete)")]
    InvalidAction(String),

    #[error("decision step cancelled")]
    Cancelled,
}

/// A tool invocation failed. Recovered locally: recorded as a failed
/// iteration and fed back into history.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Rejected by the security validator before any side effect.
    #[error("validation failed: {0}")]
    Rejected(String),

    /// The tool ran and failed; `output` holds whatever was captured.
    #[error("{message}")]
    Failed { message: String, output: String },

    /// The shared cancellation signal fired while the tool was in flight.
    #[error("cancelled while executing")]
    Cancelled,
}

impl ToolError {
    /// Partial output captured before the failure, if any.
    pub fn partial_output(&self) -> &str {
        match self {
            ToolError::Failed { output, .. } => output,
            _ => "",
        }
    }
}

