//! Session-local generation history, kept as a JSON file next to the CLI's
//! settings. Independent of the server-side `generation_history` table.

use std::path::{Path, PathBuf};

use anyhow::Context;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::generations::model::{GenerationStatus, GenerationType};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalRecord {
    pub id: String,
    #[serde(rename = "type", with = "local_type")]
    pub kind: GenerationType,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub input_images: Vec<String>,
    #[serde(default)]
    pub output_images: Vec<String>,
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub status: GenerationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The local file spells try-on as `tryon`.
mod local_type {
    use super::*;

    pub fn serialize<S: Serializer>(t: &GenerationType, s: S) -> Result<S::Ok, S::Error> {
        match t {
            GenerationType::TryOn => s.serialize_str("tryon"),
            other => s.serialize_str(other.as_str()),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<GenerationType, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone)]
pub struct NewLocalRecord {
    pub kind: GenerationType,
    pub input_images: Vec<String>,
    pub output_images: Vec<String>,
    pub parameters: serde_json::Value,
    pub status: GenerationStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LocalPatch {
    pub status: Option<GenerationStatus>,
    pub output_images: Option<Vec<String>>,
    pub parameters: Option<serde_json::Value>,
    pub error: Option<Option<String>>,
}

#[derive(Debug, Default)]
pub struct SessionHistory {
    path: Option<PathBuf>,
    records: Vec<LocalRecord>,
}

fn new_record_id(now_ms: i64) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{now_ms}-{suffix}")
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

impl SessionHistory {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the file at `path`. A missing or unreadable file starts an empty
    /// history that will be written back to `path` on [`save`](Self::save).
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<LocalRecord>>(&bytes) {
                Ok(records) => {
                    debug!(count = records.len(), path = %path.display(), "history loaded");
                    records
                }
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "history file is corrupt; starting empty");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "history file unreadable; starting empty");
                Vec::new()
            }
        };
        Self {
            path: Some(path),
            records,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Newest first.
    pub fn records(&self) -> &[LocalRecord] {
        &self.records
    }

    pub fn by_type(&self, kind: GenerationType) -> Vec<&LocalRecord> {
        self.records.iter().filter(|r| r.kind == kind).collect()
    }

    pub fn get(&self, id: &str) -> Option<&LocalRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn add(&mut self, new: NewLocalRecord) -> &LocalRecord {
        let now = now_millis();
        let record = LocalRecord {
            id: new_record_id(now),
            kind: new.kind,
            timestamp: now,
            input_images: new.input_images,
            output_images: new.output_images,
            parameters: new.parameters,
            status: new.status,
            error: new.error,
        };
        debug!(id = %record.id, "history record added");
        self.records.insert(0, record);
        &self.records[0]
    }

    /// Returns false when no record has `id`.
    pub fn update(&mut self, id: &str, patch: LocalPatch) -> bool {
        let Some(r) = self.records.iter_mut().find(|r| r.id == id) else {
            return false;
        };
        if let Some(status) = patch.status {
            r.status = status;
        }
        if let Some(out) = patch.output_images {
            r.output_images = out;
        }
        if let Some(params) = patch.parameters {
            r.parameters = params;
        }
        if let Some(error) = patch.error {
            r.error = error;
        }
        true
    }

    pub fn delete(&mut self, id: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        before != self.records.len()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Overwrites the backing file with the current records.
    pub async fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let bytes = serde_json::to_vec_pretty(&self.records)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}
