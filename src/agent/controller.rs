//! Agent Controller
//!
//! Owns the bounded observe/decide/act loop. The controller is the only
//! writer of run state; observers see value copies on the update channel
//! and can never reach into live state. Tool failures are absorbed into
//! history and the loop continues; decision failures and cancellation
//! terminate the run.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{DecisionError, ToolError};
use crate::types::{
    Action, AgentContext, AgentIteration, AgentOutcome, AgentState, AgentUpdate, DecisionEngine,
    IterationStatus, UpdateKind, DECIDE_TIMEOUT, UPDATE_CHANNEL_CAPACITY, UPDATE_SEND_TIMEOUT,
};

use super::executor::ToolExecutor;
use super::history;

/// Drives one run of the troubleshooting loop to a terminal state.
pub struct AgentRunner {
    engine: Arc<dyn DecisionEngine>,
    executor: ToolExecutor,
    state: AgentState,
    updates: mpsc::Sender<AgentUpdate>,
    cancel: CancellationToken,
}

impl AgentRunner {
    /// Create a runner and the receiving end of its update channel.
    pub fn new(
        context: AgentContext,
        engine: Arc<dyn DecisionEngine>,
        iteration_limit: usize,
    ) -> (Self, mpsc::Receiver<AgentUpdate>) {
        let (tx, rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let runner = AgentRunner {
            engine,
            executor: ToolExecutor::new(context.clone()),
            state: AgentState::new(context, iteration_limit),
            updates: tx,
            cancel: CancellationToken::new(),
        };
        (runner, rx)
    }

    /// Token for cancelling this run from outside the loop.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the loop to completion. Always returns the full state, whatever
    /// the outcome, so the iteration history survives for audit.
    pub async fn run(mut self) -> AgentState {
        let started = Instant::now();
        info!(
            environment = %self.state.context.environment,
            limit = self.state.iteration_limit,
            "agent run started"
        );
        self.send_update(AgentUpdate::event(
            UpdateKind::Started,
            format!(
                "Starting troubleshooting in '{}' (max {} iterations)",
                self.state.context.environment, self.state.iteration_limit
            ),
        ))
        .await;

        let outcome = self.run_loop().await;

        self.state.is_complete = true;
        self.state.final_outcome = Some(outcome);
        self.state.total_duration = started.elapsed();

        let success = outcome.is_success();
        let message = match outcome {
            AgentOutcome::Success => "Problem resolved".to_string(),
            AgentOutcome::IterationLimit => format!(
                "Reached maximum iterations ({}) without resolution",
                self.state.iteration_limit
            ),
            AgentOutcome::DecisionFailed => "Stopped: decision step failed".to_string(),
            AgentOutcome::Cancelled => "Cancelled by user".to_string(),
        };
        info!(?outcome, iterations = self.state.iterations.len(), "agent run finished");
        // The final update bypasses the cancellation race so a cancelled
        // run still reports how it ended.
        let update = AgentUpdate::event(UpdateKind::Finished, message).finished(success);
        if tokio::time::timeout(UPDATE_SEND_TIMEOUT, self.updates.send(update))
            .await
            .is_err()
        {
            warn!("update receiver not draining, final update dropped");
        }

        self.state
    }

    async fn run_loop(&mut self) -> AgentOutcome {
        while self.state.iterations.len() < self.state.iteration_limit {
            if self.cancel.is_cancelled() {
                return AgentOutcome::Cancelled;
            }

            let number = self.state.iterations.len() + 1;
            let mut iteration = AgentIteration::begin(number);
            let iteration_started = Instant::now();

            self.state.current_thinking = true;
            self.send_update(AgentUpdate::event(
                UpdateKind::Thinking,
                format!("Analyzing (iteration {}/{})", number, self.state.iteration_limit),
            ))
            .await;

            let decision = match self.decide().await {
                Ok(decision) => decision,
                Err(DecisionError::Cancelled) => return AgentOutcome::Cancelled,
                Err(e) => {
                    // Fatal: without a trustworthy next action the run
                    // cannot safely continue.
                    warn!(error = %e, "decision step failed, stopping run");
                    iteration.status = IterationStatus::Failed;
                    iteration.error_detail = Some(e.to_string());
                    iteration.duration = iteration_started.elapsed();
                    self.send_update(
                        AgentUpdate::event(UpdateKind::Error, e.to_string())
                            .with_iteration(&iteration),
                    )
                    .await;
                    self.state.iterations.push(iteration);
                    return AgentOutcome::DecisionFailed;
                }
            };
            self.state.current_thinking = false;

            iteration.thought = decision.thought;
            iteration.action = Some(decision.action);
            iteration.command = decision.command;

            if decision.action == Action::Complete {
                iteration.status = IterationStatus::Success;
                iteration.output = "Problem solved!".to_string();
                iteration.duration = iteration_started.elapsed();
                self.send_update(
                    AgentUpdate::event(UpdateKind::ActionComplete, "Agent reports success")
                        .with_iteration(&iteration),
                )
                .await;
                self.state.iterations.push(iteration);
                return AgentOutcome::Success;
            }

            self.send_update(
                AgentUpdate::event(
                    UpdateKind::ActionStart,
                    format!("Executing {}", decision.action),
                )
                .with_iteration(&iteration),
            )
            .await;

            match self
                .executor
                .execute(decision.action, &iteration.command, &self.cancel)
                .await
            {
                Ok(output) => {
                    iteration.status = IterationStatus::Success;
                    iteration.output = output;
                }
                Err(ToolError::Cancelled) => {
                    iteration.status = IterationStatus::Failed;
                    iteration.error_detail = Some("cancelled while executing".to_string());
                    iteration.duration = iteration_started.elapsed();
                    self.state.iterations.push(iteration);
                    return AgentOutcome::Cancelled;
                }
                Err(e) => {
                    // Recovered locally: the failure becomes part of the
                    // history the next decision call observes.
                    iteration.status = IterationStatus::Failed;
                    iteration.output = e.partial_output().to_string();
                    iteration.error_detail = Some(e.to_string());
                }
            }
            iteration.duration = iteration_started.elapsed();

            let update = if iteration.status == IterationStatus::Failed {
                AgentUpdate::event(
                    UpdateKind::Error,
                    iteration
                        .error_detail
                        .clone()
                        .unwrap_or_else(|| format!("Iteration {} failed", number)),
                )
            } else {
                AgentUpdate::event(
                    UpdateKind::ActionComplete,
                    format!("Iteration {} finished", number),
                )
            };
            self.send_update(update.with_iteration(&iteration)).await;
            self.state.iterations.push(iteration);
        }

        AgentOutcome::IterationLimit
    }

    /// One decision call, bounded by its own timeout and the cancellation
    /// signal.
    async fn decide(&self) -> Result<crate::types::Decision, DecisionError> {
        let history = history::render_history(&self.state.iterations);
        tokio::select! {
            _ = self.cancel.cancelled() => Err(DecisionError::Cancelled),
            result = tokio::time::timeout(
                DECIDE_TIMEOUT,
                self.engine.decide(&self.state.context, &history),
            ) => match result {
                Ok(decision) => decision,
                Err(_) => Err(DecisionError::Timeout(DECIDE_TIMEOUT)),
            },
        }
    }

    /// Guarded send: waits at most `UPDATE_SEND_TIMEOUT` and gives up on
    /// cancellation. A slow or vanished observer never stalls the loop.
    async fn send_update(&self, update: AgentUpdate) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            result = tokio::time::timeout(UPDATE_SEND_TIMEOUT, self.updates.send(update)) => {
                if result.is_err() {
                    warn!("update receiver not draining, update dropped");
                }
            }
        }
    }
}
