//! Decision Engine
//!
//! Asks a language model for the next action and defensively parses its
//! free-text reply into a structured [`Decision`]. Parsing is two-tier to
//! tolerate format drift from a non-deterministic producer; it fails closed
//! on anything that does not yield all three fields and a known action.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;

use crate::error::DecisionError;
use crate::types::{Action, AgentContext, Decision, DecisionEngine, DECIDE_TIMEOUT};

/// Decision engine backed by an Anthropic-style messages endpoint.
pub struct LlmDecisionEngine {
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    http: Client,
}

impl LlmDecisionEngine {
    pub fn new(api_url: String, api_key: String, model: String, max_tokens: u32) -> Self {
        let http = Client::builder()
            .timeout(DECIDE_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_url,
            api_key,
            model,
            max_tokens,
            http,
        }
    }
}

#[async_trait]
impl DecisionEngine for LlmDecisionEngine {
    async fn decide(
        &self,
        context: &AgentContext,
        history: &str,
    ) -> Result<Decision, DecisionError> {
        let prompt = build_prompt(context, history);

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [
                { "role": "user", "content": prompt }
            ],
        });

        let url = format!("{}/v1/messages", self.api_url);
        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DecisionError::Timeout(DECIDE_TIMEOUT)
                } else {
                    DecisionError::Request(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(DecisionError::Request(format!(
                "model API returned {}: {}",
                status.as_u16(),
                text
            )));
        }

        let data: Value = resp
            .json()
            .await
            .map_err(|e| DecisionError::Request(e.to_string()))?;

        let text = data["content"]
            .get(0)
            .and_then(|block| block["text"].as_str())
            .unwrap_or("");

        if text.trim().is_empty() {
            return Err(DecisionError::EmptyResponse);
        }

        parse_decision(text)
    }
}

// ─── Response Parsing ────────────────────────────────────────────

/// Extract THOUGHT, ACTION and COMMAND from a model response.
///
/// Tier 1 expects each labeled segment on its own line. When that fails,
/// tier 2 runs a tolerant line-by-line scan that accumulates multi-line
/// THOUGHT/COMMAND content. Neither tier ever substitutes a default action.
pub fn parse_decision(response: &str) -> Result<Decision, DecisionError> {
    if let Some(decision) = parse_labeled_lines(response) {
        return validate(decision, response);
    }
    let decision = parse_fallback(response);
    validate(decision, response)
}

struct RawDecision {
    thought: String,
    action: String,
    command: String,
}

/// Tier 1: single-line labeled segments, case-insensitive labels.
fn parse_labeled_lines(response: &str) -> Option<RawDecision> {
    let thought_re = Regex::new(r"(?i)THOUGHT:[ \t]*(.+)").ok()?;
    let action_re = Regex::new(r"(?i)ACTION:[ \t]*(\w+)").ok()?;
    // The command must be a single line (ended by a blank line or the end
    // of the response); multi-line commands fall through to tier 2.
    let command_re = Regex::new(r"(?i)COMMAND:[ \t]*(.+?)(?:\n\n|\n?\z)").ok()?;

    let thought = thought_re.captures(response)?.get(1)?.as_str().trim();
    let action = action_re.captures(response)?.get(1)?.as_str().trim();
    let command = command_re.captures(response)?.get(1)?.as_str().trim();

    Some(RawDecision {
        thought: thought.to_string(),
        action: action.to_string(),
        command: command.to_string(),
    })
}

/// Tier 2: tolerant line scan. THOUGHT and COMMAND may span multiple lines;
/// content accumulates until the next recognized label.
fn parse_fallback(response: &str) -> RawDecision {
    #[derive(PartialEq)]
    enum Section {
        None,
        Thought,
        Command,
    }

    let mut thought = String::new();
    let mut action = String::new();
    let mut command = String::new();
    let mut section = Section::None;

    fn label_rest<'a>(line: &'a str, label: &str) -> Option<&'a str> {
        let head = line.get(..label.len())?;
        if head.eq_ignore_ascii_case(label) {
            Some(line[label.len()..].trim())
        } else {
            None
        }
    }

    for line in response.lines() {
        let line = line.trim();

        if let Some(rest) = label_rest(line, "THOUGHT:") {
            thought = rest.to_string();
            section = Section::Thought;
            continue;
        }
        if let Some(rest) = label_rest(line, "ACTION:") {
            action = rest.to_string();
            section = Section::None;
            continue;
        }
        if let Some(rest) = label_rest(line, "COMMAND:") {
            command = rest.to_string();
            section = Section::Command;
            continue;
        }

        if line.is_empty() {
            continue;
        }
        match section {
            Section::Thought => {
                if !thought.is_empty() {
                    thought.push(' ');
                }
                thought.push_str(line);
            }
            Section::Command => {
                if !command.is_empty() {
                    command.push('\n');
                }
                command.push_str(line);
            }
            Section::None => {}
        }
    }

    RawDecision {
        thought,
        action,
        command,
    }
}

fn validate(raw: RawDecision, response: &str) -> Result<Decision, DecisionError> {
    if raw.thought.is_empty() {
        return Err(DecisionError::MissingField {
            field: "THOUGHT",
            response: response.to_string(),
        });
    }
    if raw.action.is_empty() {
        return Err(DecisionError::MissingField {
            field: "ACTION",
            response: response.to_string(),
        });
    }
    if raw.command.is_empty() {
        return Err(DecisionError::MissingField {
            field: "COMMAND",
            response: response.to_string(),
        });
    }

    let action =
        Action::parse(&raw.action).ok_or_else(|| DecisionError::InvalidAction(raw.action.clone()))?;

    Ok(Decision {
        thought: raw.thought,
        action,
        command: raw.command,
    })
}

// ─── Prompt ──────────────────────────────────────────────────────

/// Build the ReAct-style prompt for the next decision.
pub fn build_prompt(context: &AgentContext, history: &str) -> String {
    let env = &context.environment;
    let mut prompt = format!(
        r#"You are an autonomous AWS infrastructure troubleshooting agent. Your goal is to analyze and fix infrastructure deployment errors.

PROJECT LAYOUT (working directory):
- {env}.yaml in the root is the source of truth for the {env} environment.
- env/{env}/ holds Terraform generated from that YAML. Read it for diagnostics, never edit it directly: fix the YAML, regenerate, then apply.

CURRENT CONTEXT:
- Operation: {operation}
- Environment: {env}
- AWS Profile: {profile}
- AWS Region: {region}
- Working Directory: {workdir}

INITIAL ERROR:
{error}

AVAILABLE TOOLS:
1. aws_cli - Run AWS CLI commands (e.g., describe resources, check status)
2. shell - Run shell commands (e.g., grep, find, cat files)
3. file_edit - Edit configuration files (format: FILE:path|OLD:old_text|NEW:new_text)
4. terraform_plan - Run terraform plan to preview changes
5. terraform_apply - Apply terraform changes (use carefully!)
6. web_search - Search the web for documentation and solutions
7. complete - Mark the problem as solved (use when fixed)

Analyze the situation and decide on ONE action to take next.

Respond in this EXACT format:
THOUGHT: [Your reasoning about what to investigate or fix next]
ACTION: [One of: aws_cli, shell, file_edit, terraform_plan, terraform_apply, web_search, complete]
COMMAND: [Exact command to run or search query]

EXAMPLES:

THOUGHT: The error mentions an ECS service deployment failure. I should check the service status first.
ACTION: aws_cli
COMMAND: aws ecs describe-services --cluster {env}_cluster_{env} --services {env}_service_{env} --region {region}

THOUGHT: The task definition is missing an IAM role. I need to enable it in the YAML configuration.
ACTION: file_edit
COMMAND: FILE:{env}.yaml|OLD:enable_ecs_task_role: false|NEW:enable_ecs_task_role: true

THOUGHT: The ECS service is now running with healthy tasks. The deployment error has been resolved.
ACTION: complete
COMMAND: Success: ECS service is healthy with running tasks

IMPORTANT:
- Only take ONE action per iteration
- Always explain your reasoning in THOUGHT
- For file edits, use the exact format: FILE:path|OLD:old_text|NEW:new_text
- Mark as complete only when you've verified the fix worked"#,
        env = env,
        operation = context.operation,
        profile = context.aws_profile,
        region = context.aws_region,
        workdir = context.working_dir.display(),
        error = context.initial_error,
    );

    if context.resource_errors.len() > 1 {
        prompt.push_str("\n\nINDIVIDUAL RESOURCE ERRORS:");
        for err in &context.resource_errors {
            prompt.push_str("\n- ");
            prompt.push_str(err);
        }
    }

    if history.is_empty() || history == "No previous actions taken." {
        prompt.push_str("\n\nThis is your first action. Start by investigating the error.");
    } else {
        prompt.push_str("\n\nPREVIOUS ACTIONS:\n");
        prompt.push_str(history);
    }

    prompt
}
