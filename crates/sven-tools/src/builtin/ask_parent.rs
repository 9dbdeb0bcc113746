// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::builtin::ask_question::{Question, QuestionRequest};
use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

/// Lets a sub-agent ask its parent a question instead of the end user.
///
/// A sub-agent has no direct line to whoever is driving the top-level
/// session, so its tool set swaps `ask_question` for this tool, which routes
/// the question through the exact same [`QuestionRequest`] channel the
/// parent's own `ask_question` tool would use — the parent sees a question
/// arrive exactly as if it had asked itself.
pub struct AskParentTool {
    parent_tx: mpsc::Sender<QuestionRequest>,
}

impl AskParentTool {
    pub fn new(parent_tx: mpsc::Sender<QuestionRequest>) -> Self {
        Self { parent_tx }
    }
}

#[async_trait]
impl Tool for AskParentTool {
    fn name(&self) -> &str {
        "ask_parent"
    }

    fn description(&self) -> &str {
        "Ask the parent agent a single structured multiple-choice question and wait for its \
         answer. Use this when you are a sub-agent and need a decision or missing information \
         from whatever spawned you, rather than the end user directly."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "The question to ask the parent"
                },
                "options": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "List of choices. Do NOT add 'Other' — it is appended automatically.",
                    "minItems": 2
                }
            },
            "required": ["prompt", "options"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let prompt = match call.args.get("prompt").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'prompt'"),
        };
        let options: Vec<String> = match call.args.get("options").and_then(|v| v.as_array()) {
            Some(opts) => opts
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            None => return ToolOutput::err(&call.id, "missing 'options'"),
        };
        if options.len() < 2 {
            return ToolOutput::err(&call.id, "needs at least 2 options");
        }

        debug!(prompt = %prompt, "ask_parent tool");

        let (answer_tx, answer_rx) = oneshot::channel();
        let req = QuestionRequest {
            id: call.id.clone(),
            questions: vec![Question {
                prompt,
                options,
                allow_multiple: false,
            }],
            answer_tx,
        };
        if self.parent_tx.send(req).await.is_err() {
            return ToolOutput::err(&call.id, "parent is no longer listening for questions");
        }
        match answer_rx.await {
            Ok(answer) => ToolOutput::ok(&call.id, answer),
            Err(_) => ToolOutput::err(&call.id, "parent closed without answering"),
        }
    }
}
