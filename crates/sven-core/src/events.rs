// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use sven_config::AgentMode;
use sven_tools::{events::TodoItem, ToolCall};

/// Which compaction strategy actually ran, surfaced to consumers alongside
/// `AgentEvent::ContextCompacted` so the UI can explain why history changed
/// shape (a summarization turn vs. the deterministic last-resort trim).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStrategyUsed {
    Structured,
    Narrative,
    Emergency,
}

/// Events emitted by the agent during a single turn.
/// Consumers (CI runner, TUI) subscribe to these to drive their output.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A text chunk streamed from the model
    TextDelta(String),
    /// A complete text response from the model (after streaming finishes)
    TextComplete(String),
    /// A thinking/reasoning chunk from the model (extended thinking API).
    /// Consumers should accumulate deltas and finalise them into a Thinking
    /// segment when the model signals the end of the reasoning block.
    ThinkingDelta(String),
    /// A complete thinking/reasoning block (accumulated from ThinkingDelta events).
    ThinkingComplete(String),
    /// A `<status>...</status>` self-narration span extracted from the
    /// model's text output (see `StatusTagExtractor`). Never part of the
    /// user-visible transcript.
    StatusUpdate(String),
    /// The model has requested a tool call
    ToolCallStarted(ToolCall),
    /// A tool call finished
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
    },
    /// A tool call was skipped because a steer message preempted the rest of
    /// the batch (see `AgentEvent::ToolCallFinished` for its synthetic error
    /// result, which is still emitted so the conversation history stays
    /// well-formed).
    ToolSkipped { call_id: String, tool_name: String },
    /// Context was compacted; statistics for the UI
    ContextCompacted {
        tokens_before: usize,
        tokens_after: usize,
        strategy: CompactionStrategyUsed,
        /// The loop round (tool-call round) compaction ran on; 0 means the
        /// proactive pre-submit check rather than a mid-loop gate.
        turn: u32,
    },
    /// Current token usage update
    TokenUsage {
        input: u32,
        output: u32,
        /// Tokens served from the provider's prompt cache this turn.
        cache_read: u32,
        /// Tokens written into the provider's prompt cache this turn.
        cache_write: u32,
        /// Running total of cache-read tokens across the session.
        cache_read_total: u64,
        /// Running total of cache-write tokens across the session.
        cache_write_total: u64,
        /// The session's current context window budget.
        max_tokens: usize,
    },
    /// The agent has finished processing the current user turn
    TurnComplete,
    /// The current model turn was cancelled mid-stream. Any text already
    /// streamed is committed to the session and reported here so consumers
    /// can keep it visible rather than discarding it silently.
    Aborted { partial_text: String },
    /// A recoverable error occurred
    Error(String),
    /// The todo list was updated
    TodoUpdate(Vec<TodoItem>),
    /// The agent mode was changed
    ModeChanged(AgentMode),
    /// The agent is asking the user a question (id links to QuestionAnswer)
    Question { id: String, questions: Vec<String> },
    /// Answer to a previous Question event
    QuestionAnswer { id: String, answer: String },
    /// Synthesized just before a `sub_agent` call spawns its child, always
    /// itself wrapped in a `SubAgentEvent`. Lets subscribers distinguish
    /// "a child is about to start" from the child's own `TurnComplete`.
    SubAgentStart {
        model: String,
        label: String,
        tools: Vec<String>,
    },
    /// A child agent's event, republished on the parent's Event Bus.
    /// `parent_call_id` is the `sub_agent` tool call that spawned the child;
    /// `sub_session_id` is the child's own session id.
    SubAgentEvent {
        parent_call_id: String,
        sub_session_id: String,
        inner: Box<AgentEvent>,
    },
}
