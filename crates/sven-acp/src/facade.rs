// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The RPC Facade's session supervisor and method dispatch table.
//!
//! Grounded on `control::service::ControlService`: a single struct owns every
//! live session, processes one client request at a time per session (the
//! agent itself is not re-entrant), and bridges agent events onto an
//! outbound channel the transport drains. Unlike the teacher, client↔server
//! framing is JSON-RPC 2.0 over stdin/stdout rather than CBOR/WS, so the
//! bridge target is `agent/event` notifications instead of a typed
//! `ControlEvent` broadcast.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};
use tracing::{debug, info, warn};

use sven_config::{AgentMode, Config};
use sven_core::{Agent, AgentEvent};
use sven_tools::QuestionRequest;

use sven_bootstrap::{AgentBuilder, RuntimeContext, ToolSetProfile};

use crate::protocol::{Id, OutboundMessage, RpcError};
use crate::session::{default_data_dir, SessionMeta, SessionStore};

/// One live session: its agent plus the bookkeeping the facade needs to
/// serve `agent/abort`, `agent/state`, and persistence.
struct SessionEntry {
    agent: Arc<TokioMutex<Agent>>,
    model_id: String,
    title: TokioMutex<String>,
    created_at: chrono::DateTime<Utc>,
    store: Option<SessionStore>,
    cancel_tx: TokioMutex<Option<oneshot::Sender<()>>>,
    running: std::sync::atomic::AtomicBool,
    thinking_enabled: std::sync::atomic::AtomicBool,
}

#[derive(Default, serde::Serialize, serde::Deserialize)]
struct Settings {
    default_model: Option<String>,
}

#[derive(Default, serde::Serialize, serde::Deserialize)]
struct AuthFile {
    #[serde(default)]
    keys: HashMap<String, String>,
}

/// The RPC Facade: owns every session and answers every method in
/// spec.md §4.7. One instance per running `sven serve` process.
pub struct Facade {
    config: TokioMutex<Config>,
    data_dir: PathBuf,
    version: String,
    sessions: TokioMutex<HashMap<String, Arc<SessionEntry>>>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    pending_s2c: TokioMutex<HashMap<String, oneshot::Sender<Result<Value, RpcError>>>>,
    s2c_seq: AtomicU64,
}

impl Facade {
    pub fn new(config: Config, version: impl Into<String>, outbound: mpsc::UnboundedSender<OutboundMessage>) -> Arc<Self> {
        Arc::new(Self {
            config: TokioMutex::new(config),
            data_dir: default_data_dir(),
            version: version.into(),
            sessions: TokioMutex::new(HashMap::new()),
            outbound,
            pending_s2c: TokioMutex::new(HashMap::new()),
            s2c_seq: AtomicU64::new(1),
        })
    }

    fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    fn auth_path(&self) -> PathBuf {
        self.data_dir.join("auth.json")
    }

    fn read_settings(&self) -> Settings {
        std::fs::read_to_string(self.settings_path())
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn write_settings(&self, settings: &Settings) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::write(self.settings_path(), serde_json::to_vec_pretty(settings)?)?;
        Ok(())
    }

    fn read_auth(&self) -> AuthFile {
        std::fs::read_to_string(self.auth_path())
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn write_auth(&self, auth: &AuthFile) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::write(self.auth_path(), serde_json::to_vec_pretty(auth)?)?;
        Ok(())
    }

    /// Called by the transport loop when an inbound line is a response to one
    /// of our server→client requests (i.e. its `id` matches a pending one).
    pub async fn resolve_client_response(&self, id: &str, result: Result<Value, RpcError>) {
        if let Some(tx) = self.pending_s2c.lock().await.remove(id) {
            let _ = tx.send(result);
        } else {
            warn!(id, "response to unknown or already-resolved server->client request");
        }
    }

    /// Issue a server→client request and block until the client answers (or
    /// the channel is dropped, e.g. on shutdown).
    async fn request_client(&self, method: &'static str, params: Value) -> Result<Value, RpcError> {
        let n = self.s2c_seq.fetch_add(1, Ordering::SeqCst);
        let id = format!("s2c-{n}");
        let (tx, rx) = oneshot::channel();
        self.pending_s2c.lock().await.insert(id.clone(), tx);
        if self
            .outbound
            .send(OutboundMessage::request(Id::String(id.clone()), method, params))
            .is_err()
        {
            self.pending_s2c.lock().await.remove(&id);
            return Err(RpcError::server_error("transport closed"));
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(RpcError::server_error("client disconnected before responding")),
        }
    }

    fn emit_notification(&self, method: &'static str, params: Value) {
        let _ = self.outbound.send(OutboundMessage::notification(method, params));
    }

    /// Send an already-built outbound frame (used by the transport loop to
    /// deliver a dispatched request's response).
    pub fn send(&self, msg: OutboundMessage) {
        let _ = self.outbound.send(msg);
    }

    /// Send a JSON-RPC parse-error response (`id: null`) for a line that
    /// failed to deserialize at all.
    pub fn send_parse_error(&self, message: impl Into<String>) {
        let _ = self.outbound.send(OutboundMessage::parse_error(message));
    }

    // ── Method dispatch ──────────────────────────────────────────────────

    pub async fn dispatch(self: &Arc<Self>, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "opal/ping" => Ok(json!({"pong": true})),
            "opal/version" => Ok(json!({"version": self.version})),
            "session/start" => self.session_start(params).await,
            "session/close" => self.session_close(params).await,
            "agent/prompt" => self.agent_prompt(params).await,
            "agent/abort" => self.agent_abort(params).await,
            "agent/state" => self.agent_state(params).await,
            "session/compact" => self.session_compact(params).await,
            "models/list" => self.models_list(params).await,
            "model/set" => self.model_set(params).await,
            "settings/get" => Ok(serde_json::to_value(self.read_settings()).unwrap_or(Value::Null)),
            "settings/save" => self.settings_save(params),
            "opal/config/get" => {
                let cfg = self.config.lock().await;
                Ok(serde_json::to_value(&*cfg).unwrap_or(Value::Null))
            }
            "opal/config/set" => self.config_set(params).await,
            "thinking/set" => self.thinking_set(params).await,
            "auth/status" => self.auth_status(params),
            "auth/login" => self.auth_login(params),
            "auth/poll" => self.auth_status(params),
            "auth/set_key" => self.auth_set_key(params),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    async fn session_start(self: &Arc<Self>, params: Value) -> Result<Value, RpcError> {
        let persist = params.get("session").and_then(Value::as_bool).unwrap_or(true);
        let model_override = params.get("model").and_then(Value::as_str);
        let title = params
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("New session")
            .to_string();
        let mode = params
            .get("mode")
            .and_then(Value::as_str)
            .and_then(|s| match s {
                "research" => Some(AgentMode::Research),
                "plan" => Some(AgentMode::Plan),
                "agent" => Some(AgentMode::Agent),
                _ => None,
            });

        let config = self.config.lock().await.clone();
        let mode = mode.unwrap_or(config.agent.default_mode);

        let model_cfg = match model_override {
            Some(m) => sven_model::resolve_model_from_config(&config, m),
            None => config.model.clone(),
        };
        let provider = sven_model::from_config(&model_cfg)
            .map_err(|e| RpcError::server_error(format!("model init failed: {e}")))?;
        let model_id = format!("{}/{}", model_cfg.provider, model_cfg.name);
        let provider: Arc<dyn sven_model::ModelProvider> = Arc::from(provider);

        let runtime_ctx = RuntimeContext::auto_detect();
        let project_root = runtime_ctx.project_root.clone();
        let has_context_file = runtime_ctx.project_context_file.is_some();

        let (question_tx, mut question_rx) = mpsc::channel::<QuestionRequest>(4);
        let profile = ToolSetProfile::Full {
            question_tx: Some(question_tx),
            todos: Arc::new(TokioMutex::new(Vec::new())),
        };

        let config_arc = Arc::new(config.clone());
        let agent = AgentBuilder::new(config_arc)
            .with_runtime_context(runtime_ctx)
            .build(mode, provider, profile);

        let session_id = agent.session().id.clone();

        // Bridge ask_question through client/ask_user, blocking the tool task
        // until the client answers.
        let facade = self.clone();
        let sid_for_bridge = session_id.clone();
        tokio::spawn(async move {
            while let Some(req) = question_rx.recv().await {
                let params = json!({
                    "session_id": sid_for_bridge,
                    "questions": req.questions.iter().map(|q| json!({
                        "prompt": q.prompt,
                        "options": q.options,
                        "allow_multiple": q.allow_multiple,
                    })).collect::<Vec<_>>(),
                });
                let answer = match facade.request_client("client/ask_user", params).await {
                    Ok(v) => v.as_str().unwrap_or_default().to_string(),
                    Err(e) => {
                        warn!(error = %e, "client/ask_user failed");
                        String::new()
                    }
                };
                let _ = req.answer_tx.send(answer);
            }
        });

        let store = if persist {
            let store = SessionStore::new(&self.data_dir, &session_id);
            let meta = SessionMeta {
                title: title.clone(),
                created_at: Utc::now(),
                model: model_id.clone(),
            };
            if let Err(e) = store.write_meta(&meta) {
                warn!(error = %e, "failed to persist session meta");
            }
            Some(store)
        } else {
            None
        };

        let entry = Arc::new(SessionEntry {
            agent: Arc::new(TokioMutex::new(agent)),
            model_id: model_id.clone(),
            title: TokioMutex::new(title),
            created_at: Utc::now(),
            store,
            cancel_tx: TokioMutex::new(None),
            running: std::sync::atomic::AtomicBool::new(false),
            thinking_enabled: std::sync::atomic::AtomicBool::new(false),
        });
        self.sessions.lock().await.insert(session_id.clone(), entry);

        let available_skills: Vec<String> = sven_runtime::discover_skills(project_root.as_deref())
            .into_iter()
            .map(|s| s.command)
            .collect();
        let context_files: Vec<&str> = if has_context_file { vec!["AGENTS.md"] } else { vec![] };

        info!(session_id = %session_id, model = %model_id, "session started");

        Ok(json!({
            "session_id": session_id,
            "session_dir": store_dir_string(&self.data_dir, &session_id, persist),
            "context_files": context_files,
            "available_skills": available_skills,
            "mcp_servers": Vec::<String>::new(),
            "node_name": std::env::var("HOSTNAME").unwrap_or_else(|_| "sven".to_string()),
            "auth": {
                "provider": model_cfg.provider,
                "providers": sven_model::list_drivers().iter().map(|d| d.id).collect::<Vec<_>>(),
                "status": if self.read_auth().keys.contains_key(&model_cfg.provider) { "authenticated" } else { "not_authenticated" },
            },
        }))
    }

    async fn session_close(&self, params: Value) -> Result<Value, RpcError> {
        let session_id = require_str(&params, "session_id")?;
        let entry = self
            .sessions
            .lock()
            .await
            .remove(&session_id)
            .ok_or_else(|| session_not_found(&session_id))?;
        if let Some(tx) = entry.cancel_tx.lock().await.take() {
            let _ = tx.send(());
        }
        Ok(json!({}))
    }

    async fn agent_prompt(self: &Arc<Self>, params: Value) -> Result<Value, RpcError> {
        let session_id = require_str(&params, "session_id")?;
        let text = require_str(&params, "text")?;

        let entry = self.session(&session_id).await?;
        if entry.running.load(Ordering::SeqCst) {
            return Err(RpcError::server_error(format!(
                "session {session_id} is already running"
            )));
        }
        entry.running.store(true, Ordering::SeqCst);

        let (cancel_tx, cancel_rx) = oneshot::channel();
        *entry.cancel_tx.lock().await = Some(cancel_tx);

        self.emit_notification(
            "agent/event",
            json!({"session_id": session_id, "type": "agent_start"}),
        );

        let (event_tx, mut event_rx) = mpsc::channel::<AgentEvent>(512);
        let outbound = self.outbound.clone();
        let sid = session_id.clone();
        tokio::spawn(async move {
            while let Some(ev) = event_rx.recv().await {
                if let Some((ty, mut p)) = event_type_and_params(&ev) {
                    if let Value::Object(ref mut map) = p {
                        map.insert("session_id".into(), json!(sid));
                        map.insert("type".into(), json!(ty));
                    }
                    let _ = outbound.send(OutboundMessage::notification("agent/event", p));
                }
            }
        });

        let agent = entry.agent.clone();
        let facade = self.clone();
        let sid = session_id.clone();
        tokio::spawn(async move {
            let result = {
                let mut agent = agent.lock().await;
                agent.submit_with_cancel(&text, event_tx, cancel_rx).await
            };
            if let Err(e) = result {
                warn!(session_id = %sid, error = %e, "agent run failed");
                facade.emit_notification(
                    "agent/event",
                    json!({"session_id": sid, "type": "error", "reason": e.to_string()}),
                );
            }
            if let Some(entry) = facade.sessions.lock().await.get(&sid).cloned() {
                entry.running.store(false, Ordering::SeqCst);
                *entry.cancel_tx.lock().await = None;
                if let Some(store) = &entry.store {
                    let agent = entry.agent.lock().await;
                    if let Err(e) = store.rewrite_messages(&agent.session().messages) {
                        warn!(error = %e, "failed to persist session messages");
                    }
                }
            }
        });

        Ok(json!({"accepted": true}))
    }

    async fn agent_abort(&self, params: Value) -> Result<Value, RpcError> {
        let session_id = require_str(&params, "session_id")?;
        let entry = self.session(&session_id).await?;
        if let Some(tx) = entry.cancel_tx.lock().await.take() {
            let _ = tx.send(());
        }
        Ok(json!({}))
    }

    async fn agent_state(&self, params: Value) -> Result<Value, RpcError> {
        let session_id = require_str(&params, "session_id")?;
        let entry = self.session(&session_id).await?;
        let agent = entry.agent.lock().await;
        Ok(json!({
            "session_id": session_id,
            "title": entry.title.lock().await.clone(),
            "created_at": entry.created_at,
            "mode": agent.mode().to_string(),
            "model": entry.model_id,
            "running": entry.running.load(Ordering::SeqCst),
            "token_count": agent.session().token_count,
            "max_tokens": agent.session().max_tokens,
            "thinking_enabled": entry.thinking_enabled.load(Ordering::SeqCst),
        }))
    }

    /// Deterministic compaction only: the model-summarization path lives
    /// inside `Agent`'s private turn loop and isn't reachable from outside,
    /// so a forced `session/compact` always takes the emergency (no-model-call)
    /// path rather than producing a narrative/structured summary.
    async fn session_compact(&self, params: Value) -> Result<Value, RpcError> {
        let session_id = require_str(&params, "session_id")?;
        let entry = self.session(&session_id).await?;
        let mut agent = entry.agent.lock().await;
        let mode = agent.mode();
        let sys = agent.current_system_message(mode);
        let tokens_before = agent.session().token_count;
        sven_core::emergency_compact(&mut agent.session_mut().messages, Some(sys), 6);
        agent.session_mut().recalculate_tokens();
        let tokens_after = agent.session().token_count;
        if let Some(store) = &entry.store {
            if let Err(e) = store.rewrite_messages(&agent.session().messages) {
                warn!(error = %e, "failed to persist compacted session");
            }
        }
        self.emit_notification(
            "agent/event",
            json!({"session_id": session_id, "type": "compaction_end", "before": tokens_before, "after": tokens_after}),
        );
        Ok(json!({"tokens_before": tokens_before, "tokens_after": tokens_after}))
    }

    async fn models_list(&self, params: Value) -> Result<Value, RpcError> {
        let provider_filter = params.get("provider").and_then(Value::as_str);
        let refresh = params.get("refresh").and_then(Value::as_bool).unwrap_or(false);
        let entries = if refresh {
            let config = self.config.lock().await;
            let mut model_cfg = config.model.clone();
            if let Some(p) = provider_filter {
                model_cfg.provider = p.to_string();
            }
            let provider = sven_model::from_config(&model_cfg)
                .map_err(|e| RpcError::server_error(format!("model init failed: {e}")))?;
            let mut live = provider
                .list_models()
                .await
                .map_err(|e| RpcError::server_error(format!("list_models failed: {e}")))?;
            if let Some(p) = provider_filter {
                live.retain(|e| e.provider == p);
            }
            live
        } else {
            let mut all = sven_model::catalog::static_catalog();
            if let Some(p) = provider_filter {
                all.retain(|e| e.provider == p);
            }
            all
        };
        Ok(json!({"models": entries}))
    }

    async fn model_set(&self, params: Value) -> Result<Value, RpcError> {
        let session_id = require_str(&params, "session_id")?;
        let model = require_str(&params, "model")?;
        let entry = self.session(&session_id).await?;
        let config = self.config.lock().await.clone();
        let model_cfg = sven_model::resolve_model_from_config(&config, &model);
        let provider = sven_model::from_config(&model_cfg)
            .map_err(|e| RpcError::server_error(format!("model init failed: {e}")))?;
        entry
            .agent
            .lock()
            .await
            .set_model(Arc::from(provider));
        Ok(json!({"model": format!("{}/{}", model_cfg.provider, model_cfg.name)}))
    }

    fn settings_save(&self, params: Value) -> Result<Value, RpcError> {
        let settings: Settings = serde_json::from_value(params)
            .map_err(|e| RpcError::invalid_params(format!("bad settings: {e}")))?;
        self.write_settings(&settings)
            .map_err(|e| RpcError::server_error(format!("failed to save settings: {e}")))?;
        Ok(json!({}))
    }

    async fn config_set(&self, params: Value) -> Result<Value, RpcError> {
        let new_config: Config = serde_json::from_value(params)
            .map_err(|e| RpcError::invalid_params(format!("bad config: {e}")))?;
        *self.config.lock().await = new_config;
        Ok(json!({}))
    }

    async fn thinking_set(&self, params: Value) -> Result<Value, RpcError> {
        let session_id = require_str(&params, "session_id")?;
        let enabled = params.get("enabled").and_then(Value::as_bool).unwrap_or(false);
        let entry = self.session(&session_id).await?;
        entry.thinking_enabled.store(enabled, Ordering::SeqCst);
        Ok(json!({"enabled": enabled}))
    }

    fn auth_status(&self, params: Value) -> Result<Value, RpcError> {
        let provider = params
            .get("provider")
            .and_then(Value::as_str)
            .unwrap_or("anthropic")
            .to_string();
        let status = if self.read_auth().keys.contains_key(&provider) {
            "authenticated"
        } else {
            "not_authenticated"
        };
        Ok(json!({
            "provider": provider,
            "providers": sven_model::list_drivers().iter().map(|d| d.id).collect::<Vec<_>>(),
            "status": status,
        }))
    }

    fn auth_login(&self, params: Value) -> Result<Value, RpcError> {
        let provider = require_str(&params, "provider")?;
        debug!(provider, "auth/login requested");
        Ok(json!({
            "status": "pending",
            "message": "call auth/set_key with an API key for this provider to complete login",
        }))
    }

    fn auth_set_key(&self, params: Value) -> Result<Value, RpcError> {
        let provider = require_str(&params, "provider")?;
        let api_key = require_str(&params, "api_key")?;
        let mut auth = self.read_auth();
        auth.keys.insert(provider, api_key);
        self.write_auth(&auth)
            .map_err(|e| RpcError::server_error(format!("failed to save credentials: {e}")))?;
        Ok(json!({"status": "authenticated"}))
    }

    async fn session(&self, session_id: &str) -> Result<Arc<SessionEntry>, RpcError> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| session_not_found(session_id))
    }
}

fn store_dir_string(data_dir: &std::path::Path, session_id: &str, persist: bool) -> Option<String> {
    if persist {
        Some(
            data_dir
                .join("sessions")
                .join(session_id)
                .display()
                .to_string(),
        )
    } else {
        None
    }
}

fn session_not_found(session_id: &str) -> RpcError {
    RpcError::new(
        crate::protocol::METHOD_NOT_FOUND,
        format!("session not found: {session_id}"),
    )
}

fn require_str(params: &Value, field: &str) -> Result<String, RpcError> {
    params
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RpcError::invalid_params(format!("missing '{field}'")))
}

/// Map one `AgentEvent` onto its wire `(type, params)` pair per the event
/// taxonomy in spec.md §4.1. `None` means "internal bookkeeping, not
/// forwarded to clients" (e.g. `TextComplete`, which only restates the
/// accumulation of `message_delta`s already sent).
fn event_type_and_params(ev: &AgentEvent) -> Option<(&'static str, Value)> {
    match ev {
        AgentEvent::TextDelta(delta) => Some(("message_delta", json!({"delta": delta}))),
        AgentEvent::TextComplete(_) => None,
        AgentEvent::ThinkingDelta(delta) => Some(("thinking_delta", json!({"delta": delta}))),
        AgentEvent::ThinkingComplete(_) => None,
        AgentEvent::StatusUpdate(text) => Some(("status_update", json!({"text": text}))),
        AgentEvent::ToolCallStarted(tc) => Some((
            "tool_execution_start",
            json!({"tool": tc.name, "call_id": tc.id, "args": tc.args}),
        )),
        AgentEvent::ToolCallFinished {
            call_id,
            tool_name,
            output,
            is_error,
        } => Some((
            "tool_execution_end",
            json!({"tool": tool_name, "call_id": call_id, "result": output, "is_error": is_error}),
        )),
        AgentEvent::ToolSkipped { call_id, tool_name } => Some((
            "tool_skipped",
            json!({"tool": tool_name, "call_id": call_id}),
        )),
        AgentEvent::ContextCompacted {
            tokens_before,
            tokens_after,
            strategy,
            turn,
        } => Some((
            "compaction_end",
            json!({"before": tokens_before, "after": tokens_after, "strategy": format!("{strategy:?}"), "turn": turn}),
        )),
        AgentEvent::TokenUsage {
            input,
            output,
            cache_read,
            cache_write,
            cache_read_total,
            cache_write_total,
            max_tokens,
        } => Some((
            "usage_update",
            json!({"usage": {
                "input": input, "output": output,
                "cache_read": cache_read, "cache_write": cache_write,
                "cache_read_total": cache_read_total, "cache_write_total": cache_write_total,
                "max_tokens": max_tokens,
            }}),
        )),
        AgentEvent::TurnComplete => Some(("agent_end", json!({}))),
        AgentEvent::Aborted { partial_text } => {
            Some(("agent_abort", json!({"partial_text": partial_text})))
        }
        AgentEvent::Error(msg) => Some(("error", json!({"reason": msg}))),
        AgentEvent::TodoUpdate(_) => None,
        AgentEvent::ModeChanged(mode) => Some(("mode_changed", json!({"mode": mode.to_string()}))),
        // Routed through `client/ask_user` directly, not the `agent/event` stream.
        AgentEvent::Question { .. } | AgentEvent::QuestionAnswer { .. } => None,
        AgentEvent::SubAgentStart { model, label, tools } => Some((
            "sub_agent_start",
            json!({"model": model, "label": label, "tools": tools}),
        )),
        AgentEvent::SubAgentEvent {
            parent_call_id,
            sub_session_id,
            inner,
        } => {
            let inner_json = match event_type_and_params(inner) {
                Some((ty, params)) => json!({"type": ty, "params": params}),
                None => Value::Null,
            };
            Some((
                "sub_agent_event",
                json!({
                    "parent_call_id": parent_call_id,
                    "sub_session_id": sub_session_id,
                    "inner": inner_json,
                }),
            ))
        }
    }
}
