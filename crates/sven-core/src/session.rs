// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sven_model::Message;
use uuid::Uuid;

/// One saved turn in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub role: String,
    pub content: String,
}

/// In-memory conversation session.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    /// Approximate total token count for the current message list
    pub token_count: usize,
    /// Maximum context tokens (set from model config / provider limits)
    pub max_tokens: usize,
    /// Reserved output budget — subtracted from `max_tokens` when computing
    /// how much of the window is available for input.  Set from the model
    /// catalog's `max_output_tokens` at construction and on `set_model`.
    pub max_output_tokens: usize,
    /// Tokens sent on every request but not stored in `messages` (tool
    /// schemas + dynamic context block).  Recomputed once per loop round.
    pub schema_overhead: usize,
    /// Correction factor applied to the chars/4 token estimate, tuned from
    /// the provider's actual reported input token counts.  Starts at 1.0
    /// (no correction) and drifts toward the true ratio over the session.
    pub calibration_factor: f32,
    /// Running total of prompt-cache tokens read across the session.
    pub cache_read_total: u64,
    /// Running total of prompt-cache tokens written across the session.
    pub cache_write_total: u64,
}

impl Session {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            token_count: 0,
            max_tokens,
            max_output_tokens: 0,
            schema_overhead: 0,
            calibration_factor: 1.0,
            cache_read_total: 0,
            cache_write_total: 0,
        }
    }

    /// Tokens available for input content: the context window minus the
    /// reserved output budget and the current schema/dynamic-context overhead.
    /// Returns 0 (never underflows) once reservations exceed the window.
    pub fn input_budget(&self) -> usize {
        self.max_tokens
            .saturating_sub(self.max_output_tokens)
            .saturating_sub(self.schema_overhead)
    }

    /// Fold a provider's actual input token count into the calibration
    /// factor using a simple exponential moving average, so repeated
    /// corrections converge rather than oscillate on a single outlier.
    pub fn update_calibration(&mut self, actual_input: u32, estimated: usize) {
        if estimated == 0 {
            return;
        }
        let ratio = actual_input as f32 / estimated as f32;
        if !ratio.is_finite() || ratio <= 0.0 {
            return;
        }
        const ALPHA: f32 = 0.3;
        self.calibration_factor = self.calibration_factor * (1.0 - ALPHA) + ratio * ALPHA;
    }

    /// Accumulate this turn's prompt-cache usage into the running totals.
    pub fn add_cache_usage(&mut self, cache_read_tokens: u32, cache_write_tokens: u32) {
        self.cache_read_total += cache_read_tokens as u64;
        self.cache_write_total += cache_write_tokens as u64;
    }

    pub fn push(&mut self, msg: Message) {
        self.token_count += msg.approx_tokens();
        self.messages.push(msg);
    }

    pub fn push_many(&mut self, msgs: impl IntoIterator<Item = Message>) {
        for m in msgs { self.push(m); }
    }

    /// Fraction of context window consumed (0.0–1.0)
    pub fn context_fraction(&self) -> f32 {
        if self.max_tokens == 0 { return 0.0; }
        (self.token_count as f32) / (self.max_tokens as f32)
    }

    pub fn is_near_limit(&self, threshold: f32) -> bool {
        self.context_fraction() >= threshold
    }

    /// Recalculate token count from scratch (call after compaction).
    pub fn recalculate_tokens(&mut self) {
        self.token_count = self.messages.iter().map(|m| m.approx_tokens()).sum();
    }

    /// Replace the message list and recalculate token count (for resubmit / edit).
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.recalculate_tokens();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
