// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-session multicast fan-out of [`AgentEvent`]s to many subscribers
//! (UI, parent-session forwarders, test observers).
//!
//! The Turn Engine itself only ever emits into the single `mpsc::Sender`
//! passed to `Agent::submit`. [`EventBus::pump`] drains that channel and
//! republishes every event to every subscriber registered via
//! [`EventBus::subscribe`]. A lagging subscriber only ever loses events off
//! its own receiver — `tokio::sync::broadcast`'s native `Lagged(n)` signal —
//! it never blocks the Turn Engine or any other subscriber.

use tokio::sync::{broadcast, mpsc};

use crate::events::AgentEvent;

/// Per-subscriber queue depth before a lagging subscriber starts missing
/// events instead of blocking the producer.
const DEFAULT_CAPACITY: usize = 256;

/// A per-session multicast channel of [`AgentEvent`]s.
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Register a new subscriber. Unsubscription is simply dropping the
    /// returned receiver — no explicit unsubscribe call is needed.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    /// How many subscribers are currently registered.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish one event to every current subscriber. Fire-and-forget: with
    /// no subscribers this is a no-op, never an error — mirrors the Turn
    /// Engine's own "emits are fire-and-forget" contract.
    pub fn publish(&self, event: AgentEvent) {
        let _ = self.tx.send(event);
    }

    /// Drain `source` (a Turn Engine's own event channel) and republish
    /// every event onto this bus until `source` closes.
    pub async fn pump(&self, mut source: mpsc::Receiver<AgentEvent>) {
        while let Some(event) = source.recv().await {
            self.publish(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
