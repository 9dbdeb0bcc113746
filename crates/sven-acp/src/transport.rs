// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Line-delimited JSON-RPC 2.0 transport over stdin/stdout.
//!
//! One JSON object per line in each direction. stdout carries only
//! JSON-RPC frames — all diagnostic output goes to stderr via `tracing`
//! (see `init_logging` in the `sven` binary), mirroring how the teacher's
//! `sven-node` never mixes its CBOR wire bytes with log lines on the same
//! stream.
//!
//! A single writer task owns stdout so that `agent/event` notifications
//! racing a request's response never interleave mid-line.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, warn};

use sven_config::Config;

use crate::facade::Facade;
use crate::protocol::{Id, InboundMessage, OutboundMessage};

/// Run the JSON-RPC server loop against the process's stdin/stdout until
/// stdin is closed.
pub async fn run_stdio_server(config: Config, version: &str) -> anyhow::Result<()> {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let facade = Facade::new(config, version, outbound_tx);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(msg) = outbound_rx.recv().await {
            let line = match serde_json::to_string(&msg) {
                Ok(l) => l,
                Err(e) => {
                    error!(error = %e, "failed to serialize outbound message");
                    continue;
                }
            };
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            if stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        handle_line(&facade, line).await;
    }

    drop(facade);
    let _ = writer.await;
    Ok(())
}

async fn handle_line(facade: &Arc<Facade>, line: &str) {
    let inbound: InboundMessage = match serde_json::from_str(line) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "malformed JSON-RPC line");
            facade.send_parse_error(format!("invalid JSON: {e}"));
            return;
        }
    };

    if inbound.is_response() {
        let id = inbound.id.as_ref().expect("is_response implies id.is_some()").to_string();
        let result = match inbound.error {
            Some(e) => Err(e),
            None => Ok(inbound.result.unwrap_or(Value::Null)),
        };
        facade.resolve_client_response(&id, result).await;
        return;
    }

    let Some(method) = inbound.method.clone() else {
        warn!("inbound line has neither a method nor a response shape");
        return;
    };
    let params = inbound.params.clone().unwrap_or(Value::Null);
    let id = inbound.id.clone();

    let facade = facade.clone();
    tokio::spawn(async move {
        let outcome = facade.dispatch(&method, params).await;
        let Some(id) = id else {
            // Notification: run for effect, no response is sent even on error.
            if let Err(e) = outcome {
                warn!(method = %method, error = %e, "notification handler failed");
            }
            return;
        };
        let response = match outcome {
            Ok(result) => OutboundMessage::ok(id, result),
            Err(err) => OutboundMessage::err(id, err),
        };
        facade.send(response);
    });
}
