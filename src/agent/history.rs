//! History Builder
//!
//! Renders prior iterations into the textual context consumed by the
//! decision engine. One fixed-format block per iteration, with output
//! truncated per entry. No summarization or windowing: growth is linear
//! in iteration count, bounded by the run's iteration limit.

use std::fmt::Write;

use crate::types::{AgentIteration, IterationStatus, HISTORY_OUTPUT_LIMIT};

/// Render the full iteration history for the next decision call.
pub fn render_history(iterations: &[AgentIteration]) -> String {
    if iterations.is_empty() {
        return "No previous actions taken.".to_string();
    }

    let mut history = String::new();
    for iter in iterations {
        let _ = write!(
            history,
            "\n--- Iteration {} ---\n\
             THOUGHT: {}\n\
             ACTION: {}\n\
             COMMAND: {}\n\
             OUTPUT: {}\n",
            iter.number,
            iter.thought,
            iter.action.map(|a| a.name()).unwrap_or("none"),
            iter.command,
            truncate_output(&iter.output, HISTORY_OUTPUT_LIMIT),
        );
        if iter.status == IterationStatus::Failed {
            if let Some(ref detail) = iter.error_detail {
                let _ = writeln!(history, "ERROR: {}", detail);
            }
        }
        let _ = writeln!(
            history,
            "STATUS: {}",
            match iter.status {
                IterationStatus::Running => "running",
                IterationStatus::Success => "success",
                IterationStatus::Failed => "failed",
            }
        );
    }

    history
}

/// Limit output length for model context, respecting UTF-8 boundaries.
pub fn truncate_output(output: &str, max_len: usize) -> String {
    match output.char_indices().nth(max_len) {
        Some((idx, _)) => format!("{}\n... (output truncated)", &output[..idx]),
        None => output.to_string(),
    }
}
