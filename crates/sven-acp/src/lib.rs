// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! ACP (Agent Client Protocol) server: exposes `Agent` as a line-delimited
//! JSON-RPC 2.0 service over stdin/stdout.
//!
//! Grounded on `sven-node`'s `control` module (`ControlCommand` /
//! `ControlEvent` / `ControlService`), generalized from CBOR-over-P2P to
//! JSON-RPC-over-stdio: one [`Facade`] owns every live session and answers
//! the method table in full; [`transport`] drains stdin, dispatches, and
//! serializes responses/notifications back out.

mod facade;
mod protocol;
mod session;
mod transport;

pub use facade::Facade;
pub use protocol::{Id, InboundMessage, OutboundMessage, RpcError};
pub use session::{default_data_dir, SessionMeta, SessionStore};
pub use transport::run_stdio_server;
