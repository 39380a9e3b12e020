//! Opsmedic - Type Definitions
//!
//! Shared types for the autonomous troubleshooting agent core:
//! the run context, iteration records, lifecycle updates, and the
//! closed set of actions the agent may take.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecisionError;

// ─── Limits & Timeouts ───────────────────────────────────────────

/// Maximum iterations per run unless overridden at construction.
pub const DEFAULT_ITERATION_LIMIT: usize = 20;

/// Timeout for a single decision-engine call.
pub const DECIDE_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-action execution timeouts.
pub const AWS_CLI_TIMEOUT: Duration = Duration::from_secs(2 * 60);
pub const SHELL_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const TERRAFORM_PLAN_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const TERRAFORM_APPLY_TIMEOUT: Duration = Duration::from_secs(15 * 60);
pub const WEB_SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Update channel capacity and the bound on a blocked send.
pub const UPDATE_CHANNEL_CAPACITY: usize = 10;
pub const UPDATE_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest file the edit handler will open.
pub const MAX_EDIT_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Per-iteration output cap when rendering history for the model.
pub const HISTORY_OUTPUT_LIMIT: usize = 500;

// ─── Run Context ─────────────────────────────────────────────────

/// Environment and problem details handed to the agent.
/// Immutable for the duration of a run; created once before the loop starts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentContext {
    /// The operation that triggered the run, e.g. "terraform_apply" or "troubleshooting".
    pub operation: String,
    /// Target environment name, e.g. "dev" or "prod".
    pub environment: String,
    pub aws_profile: String,
    pub aws_region: String,
    pub working_dir: PathBuf,
    /// The error (or problem description) that triggered the agent.
    pub initial_error: String,
    /// Individual error messages when more than one is available.
    pub resource_errors: Vec<String>,
}

// ─── Actions ─────────────────────────────────────────────────────

/// The closed set of actions the agent can take. There is no dynamic
/// extension at runtime; an unrecognized action name fails closed in
/// the decision parser.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    AwsCli,
    Shell,
    FileEdit,
    TerraformPlan,
    TerraformApply,
    WebSearch,
    /// Terminates the loop successfully; carries no side effect.
    Complete,
}

impl Action {
    /// Parse an action name as produced by the model. Case-insensitive,
    /// returns `None` for anything outside the closed set.
    pub fn parse(name: &str) -> Option<Action> {
        match name.trim().to_lowercase().as_str() {
            "aws_cli" => Some(Action::AwsCli),
            "shell" => Some(Action::Shell),
            "file_edit" => Some(Action::FileEdit),
            "terraform_plan" => Some(Action::TerraformPlan),
            "terraform_apply" => Some(Action::TerraformApply),
            "web_search" => Some(Action::WebSearch),
            "complete" => Some(Action::Complete),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::AwsCli => "aws_cli",
            Action::Shell => "shell",
            Action::FileEdit => "file_edit",
            Action::TerraformPlan => "terraform_plan",
            Action::TerraformApply => "terraform_apply",
            Action::WebSearch => "web_search",
            Action::Complete => "complete",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Decisions ───────────────────────────────────────────────────

/// The decision engine's choice for the next step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Decision {
    pub thought: String,
    pub action: Action,
    pub command: String,
}

/// Produces the next action given the run context and rendered history.
/// The controller depends only on this contract, not on how the decision
/// is made.
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    async fn decide(
        &self,
        context: &AgentContext,
        history: &str,
    ) -> Result<Decision, DecisionError>;
}

// ─── Iterations & State ──────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    Running,
    Success,
    Failed,
}

/// A single think/act/observe cycle. Finalized after the act step,
/// immutable thereafter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentIteration {
    /// 1-based, strictly increasing, no gaps.
    pub number: usize,
    pub thought: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    pub command: String,
    /// Captured result; may hold partial output when the action failed.
    pub output: String,
    pub status: IterationStatus,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl AgentIteration {
    pub fn begin(number: usize) -> Self {
        AgentIteration {
            number,
            thought: String::new(),
            action: None,
            command: String::new(),
            output: String::new(),
            status: IterationStatus::Running,
            duration: Duration::ZERO,
            timestamp: Utc::now(),
            error_detail: None,
        }
    }
}

/// How a run ended. `IterationLimit` and `DecisionFailed` both present as
/// "failed" to the operator but stay distinguishable for audit.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentOutcome {
    Success,
    IterationLimit,
    DecisionFailed,
    Cancelled,
}

impl AgentOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AgentOutcome::Success)
    }
}

/// Full execution state of one run. Owned exclusively by the controller's
/// worker; external readers only see iteration copies on the update channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentState {
    pub iterations: Vec<AgentIteration>,
    pub current_thinking: bool,
    pub is_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_outcome: Option<AgentOutcome>,
    pub total_duration: Duration,
    pub iteration_limit: usize,
    pub context: AgentContext,
}

impl AgentState {
    pub fn new(context: AgentContext, iteration_limit: usize) -> Self {
        AgentState {
            iterations: Vec::new(),
            current_thinking: false,
            is_complete: false,
            final_outcome: None,
            total_duration: Duration::ZERO,
            iteration_limit,
            context,
        }
    }
}

// ─── Updates ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Started,
    Thinking,
    ActionStart,
    ActionComplete,
    Finished,
    Error,
}

/// Lifecycle event copied onto the update channel. Value type; never a
/// reference into live state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentUpdate {
    pub kind: UpdateKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<AgentIteration>,
    pub message: String,
    pub is_complete: bool,
    pub success: bool,
}

impl AgentUpdate {
    pub fn event(kind: UpdateKind, message: impl Into<String>) -> Self {
        AgentUpdate {
            kind,
            iteration: None,
            message: message.into(),
            is_complete: false,
            success: false,
        }
    }

    pub fn with_iteration(mut self, iteration: &AgentIteration) -> Self {
        self.iteration = Some(iteration.clone());
        self
    }

    pub fn finished(mut self, success: bool) -> Self {
        self.is_complete = true;
        self.success = success;
        self
    }
}
