// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! SubAgentTool — spawns a depth-1-only child session to complete a focused
//! sub-task, handing it `ask_parent` in place of `ask_question`.
//!
//! Lives in `sven-bootstrap` rather than `sven-core` so it can call
//! `build_tool_registry` without a circular dependency
//! (sven-core → sven-tools, sven-bootstrap → sven-core + sven-tools).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use sven_config::{AgentConfig, AgentMode, Config};
use sven_core::{Agent, AgentEvent, AgentRuntimeContext, EventBus};

use sven_tools::{
    events::{TodoItem, ToolEvent},
    policy::ApprovalPolicy,
    tool::{Tool, ToolCall, ToolOutput},
    QuestionRequest,
};

use crate::context::ToolSetProfile;
use crate::registry::build_tool_registry;

/// Spawns a depth-1-only child session to complete a focused task and
/// returns its final text output.
///
/// The child never receives this tool itself (`ToolSetProfile::SubAgent`
/// simply doesn't register it), so nesting bottoms out structurally after
/// one level rather than through a decrementing depth counter.
pub struct SubAgentTool {
    model: Arc<dyn sven_model::ModelProvider>,
    config: Arc<Config>,
    /// Runtime context to pass to the child (project root, CI/git notes,
    /// AGENTS.md content). The child inherits the parent's context so it
    /// knows where to operate.
    sub_agent_runtime: AgentRuntimeContext,
    /// The parent's Event Bus. Every child event is republished here as
    /// `AgentEvent::SubAgentEvent { parent_call_id, sub_session_id, inner }`
    /// so parent subscribers see the child's activity as it happens, not
    /// just the tool's final text result.
    event_bus: Arc<EventBus>,
}

impl SubAgentTool {
    pub fn new(
        model: Arc<dyn sven_model::ModelProvider>,
        config: Arc<Config>,
        sub_agent_runtime: AgentRuntimeContext,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            model,
            config,
            sub_agent_runtime,
            event_bus,
        }
    }
}

/// Truncate to a short human-readable label for `SubAgentStart.label`.
fn label_from_prompt(prompt: &str) -> String {
    const MAX: usize = 60;
    let first_line = prompt.lines().next().unwrap_or(prompt);
    if first_line.chars().count() <= MAX {
        first_line.to_string()
    } else {
        let truncated: String = first_line.chars().take(MAX).collect();
        format!("{truncated}…")
    }
}

#[async_trait]
impl Tool for SubAgentTool {
    fn name(&self) -> &str {
        "sub_agent"
    }

    fn description(&self) -> &str {
        "Spawn a child agent to complete a focused task and return its final text output. \
         Useful for delegating isolated sub-tasks. The child inherits your tools (optionally \
         filtered by name) and model (optionally overridden), but cannot itself spawn a \
         sub_agent — nesting is one level deep. The child can ask you questions via ask_parent."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "The task description for the child agent"
                },
                "mode": {
                    "type": "string",
                    "enum": ["research", "plan", "agent"],
                    "description": "Operating mode for the child agent (default: agent)"
                },
                "tools": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Restrict the child to this subset of your tools (default: all)"
                },
                "model": {
                    "type": "string",
                    "description": "Override the model id for the child (default: yours)"
                },
                "max_rounds": {
                    "type": "integer",
                    "description": "Maximum tool-call rounds (default: from config)"
                }
            },
            "required": ["prompt"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Agent]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let prompt = match call.args.get("prompt").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'prompt'"),
        };
        let mode_str = call
            .args
            .get("mode")
            .and_then(|v| v.as_str())
            .unwrap_or("agent");
        let mode = match mode_str {
            "research" => AgentMode::Research,
            "plan" => AgentMode::Plan,
            "agent" => AgentMode::Agent,
            other => return ToolOutput::err(&call.id, format!("unknown mode: {other}")),
        };

        let tool_filter: Option<Vec<String>> = call
            .args
            .get("tools")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            });

        let model: Arc<dyn sven_model::ModelProvider> =
            match call.args.get("model").and_then(|v| v.as_str()) {
                Some(id) => {
                    let cfg = sven_model::resolve_model_from_config(&self.config, id);
                    match sven_model::from_config(&cfg) {
                        Ok(provider) => Arc::from(provider),
                        Err(e) => {
                            return ToolOutput::err(&call.id, format!("model override failed: {e}"))
                        }
                    }
                }
                None => self.model.clone(),
            };

        debug!(prompt = %prompt, mode = %mode, tools = ?tool_filter, "sub_agent: spawning child");

        let mut sub_config: AgentConfig = self.config.agent.clone();
        if let Some(max_rounds) = call.args.get("max_rounds").and_then(|v| v.as_u64()) {
            sub_config.max_tool_rounds = max_rounds as u32;
        }

        let todos: Arc<Mutex<Vec<TodoItem>>> = Arc::new(Mutex::new(Vec::new()));

        // The child's own ask_question-equivalent calls come back through this
        // channel as ordinary QuestionRequests — from the parent's point of
        // view a child's question looks exactly like one it would have asked
        // itself. Unanswered requests are simply dropped along with `rx` when
        // this call returns, which resolves the child's `answer_rx` as an error.
        let (ask_parent_tx, mut ask_parent_rx) = mpsc::channel::<QuestionRequest>(4);

        let profile = ToolSetProfile::SubAgent {
            todos,
            ask_parent_tx,
            tool_filter,
        };

        // Sub-agents use the SubAgent profile (no sub_agent tool), so
        // sub_agent_runtime is unused here — pass default.
        let mode_lock = Arc::new(Mutex::new(mode));
        let (tool_event_tx, tool_event_rx) = mpsc::channel::<ToolEvent>(64);

        let model_name = model.name().to_string();

        let tools = Arc::new(build_tool_registry(
            &self.config,
            model.clone(),
            profile,
            mode_lock.clone(),
            tool_event_tx,
            AgentRuntimeContext::default(),
            self.event_bus.clone(),
        ));
        let tool_names = tools.names();

        let mut agent = Agent::new(
            model,
            tools,
            Arc::new(sub_config),
            self.sub_agent_runtime.clone(),
            mode_lock,
            tool_event_rx,
            128_000,
        );

        let parent_call_id = call.id.clone();
        let sub_session_id = agent.session().id.clone();

        self.event_bus.publish(AgentEvent::SubAgentEvent {
            parent_call_id: parent_call_id.clone(),
            sub_session_id: sub_session_id.clone(),
            inner: Box::new(AgentEvent::SubAgentStart {
                model: model_name,
                label: label_from_prompt(&prompt),
                tools: tool_names,
            }),
        });

        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);

        // Republish every child event on the parent's Event Bus, wrapped
        // with the correlation ids, while also collecting the child's text
        // for the tool's own return value. Runs concurrently with
        // `agent.submit` rather than draining afterwards, so the parent's
        // subscribers see the child's activity as it happens.
        let bus = self.event_bus.clone();
        let forward = tokio::spawn(async move {
            let mut output = String::new();
            while let Some(event) = rx.recv().await {
                if let AgentEvent::TextDelta(ref delta) = event {
                    output.push_str(delta);
                }
                bus.publish(AgentEvent::SubAgentEvent {
                    parent_call_id: parent_call_id.clone(),
                    sub_session_id: sub_session_id.clone(),
                    inner: Box::new(event),
                });
            }
            output
        });

        let submit_result = agent.submit(&prompt, tx).await;

        // Auto-reject any question the child asked mid-run but never got an
        // answer to, so its oneshot resolves instead of hanging forever.
        while let Ok(req) = ask_parent_rx.try_recv() {
            let _ = req
                .answer_tx
                .send("(no answer — parent did not respond)".to_string());
        }

        let output = forward.await.unwrap_or_default();

        match submit_result {
            Ok(_) => {
                if output.is_empty() {
                    ToolOutput::ok(&call.id, "(sub-agent produced no text output)")
                } else {
                    ToolOutput::ok(&call.id, output)
                }
            }
            Err(e) => ToolOutput::err(&call.id, format!("sub-agent error: {e}")),
        }
    }
}
