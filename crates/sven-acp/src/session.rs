// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Persisted session layout: `<data_dir>/sessions/<id>/{meta.json,messages.jsonl}`.
//!
//! Writes are append-then-rename for `meta.json` (atomic replace) and plain
//! append for `messages.jsonl`, mirroring the write-once-read-many shape
//! `sven_config`'s YAML loader uses for its own config layers.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sven_model::Message;

/// Default `<data_dir>`: `$HOME/.opal` on Unix, the platform app-data dir
/// elsewhere.
pub fn default_data_dir() -> PathBuf {
    if cfg!(windows) {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("opal")
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".opal")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub model: String,
}

pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// `<data_dir>/sessions/<id>`. Created lazily on first write.
    pub fn new(data_dir: &Path, session_id: &str) -> Self {
        Self {
            dir: data_dir.join("sessions").join(session_id),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_meta(&self, meta: &SessionMeta) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let final_path = self.dir.join("meta.json");
        let tmp_path = self.dir.join("meta.json.tmp");
        let json = serde_json::to_vec_pretty(meta)?;
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    pub fn read_meta(&self) -> anyhow::Result<SessionMeta> {
        let text = std::fs::read_to_string(self.dir.join("meta.json"))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Append one message to `messages.jsonl`.
    pub fn append_message(&self, msg: &Message) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join("messages.jsonl"))?;
        let line = serde_json::to_string(msg)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Replace the entire append log, used after compaction rewrites history.
    pub fn rewrite_messages(&self, messages: &[Message]) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let final_path = self.dir.join("messages.jsonl");
        let tmp_path = self.dir.join("messages.jsonl.tmp");
        let mut buf = Vec::new();
        for msg in messages {
            serde_json::to_writer(&mut buf, msg)?;
            buf.push(b'\n');
        }
        std::fs::write(&tmp_path, buf)?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }
}
