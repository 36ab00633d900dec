use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GenerationType {
    Derivation,
    Avatar,
    #[serde(alias = "tryon")]
    TryOn,
    Swap,
}

impl GenerationType {
    pub const ALL: [GenerationType; 4] = [
        GenerationType::Derivation,
        GenerationType::Avatar,
        GenerationType::TryOn,
        GenerationType::Swap,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GenerationType::Derivation => "derivation",
            GenerationType::Avatar => "avatar",
            GenerationType::TryOn => "try_on",
            GenerationType::Swap => "swap",
        }
    }
}

impl fmt::Display for GenerationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "derivation" => Ok(Self::Derivation),
            "avatar" => Ok(Self::Avatar),
            "try_on" | "tryon" => Ok(Self::TryOn),
            "swap" => Ok(Self::Swap),
            other => anyhow::bail!("unknown generation type: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl GenerationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationStatus::Pending => "pending",
            GenerationStatus::Processing => "processing",
            GenerationStatus::Completed => "completed",
            GenerationStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, GenerationStatus::Completed | GenerationStatus::Failed)
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => anyhow::bail!("unknown generation status: {other}"),
        }
    }
}

/// Reference to a stored image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageData {
    pub filename: String,
    pub storage_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Generation {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: GenerationType,
    pub status: GenerationStatus,
    pub input_images: Vec<ImageData>,
    pub output_images: Vec<ImageData>,
    pub parameters: serde_json::Value,
    pub error_message: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

/// Raw `generation_history` row; enums are stored as checked TEXT.
#[derive(Debug, FromRow)]
pub struct GenerationRow {
    pub id: Uuid,
    pub user_id: Uuid,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub status: String,
    pub input_images: Json<Vec<ImageData>>,
    pub output_images: Json<Vec<ImageData>>,
    pub parameters: serde_json::Value,
    pub error_message: Option<String>,
    pub created_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

impl TryFrom<GenerationRow> for Generation {
    type Error = anyhow::Error;

    fn try_from(r: GenerationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            user_id: r.user_id,
            kind: r.kind.parse()?,
            status: r.status.parse()?,
            input_images: r.input_images.0,
            output_images: r.output_images.0,
            parameters: r.parameters,
            error_message: r.error_message,
            created_at: r.created_at,
            completed_at: r.completed_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewGeneration {
    pub kind: GenerationType,
    pub input_images: Vec<ImageData>,
    pub parameters: serde_json::Value,
}

/// Partial update; `None` fields are left untouched. `error_message:
/// Some(None)` clears the message.
#[derive(Debug, Clone, Default)]
pub struct GenerationPatch {
    pub status: Option<GenerationStatus>,
    pub output_images: Option<Vec<ImageData>>,
    pub error_message: Option<Option<String>>,
}

/// What an update does to `completed_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Keep,
    Stamp(OffsetDateTime),
    Clear,
}

impl GenerationPatch {
    /// `completed_at` tracks terminal status: moving into completed/failed stamps
    /// it, moving back to pending/processing clears it.
    pub fn completion(&self, now: OffsetDateTime) -> Completion {
        match self.status {
            Some(s) if s.is_terminal() => Completion::Stamp(now),
            Some(_) => Completion::Clear,
            None => Completion::Keep,
        }
    }

    pub fn apply(self, g: &mut Generation, now: OffsetDateTime) {
        match self.completion(now) {
            Completion::Stamp(at) => g.completed_at = Some(at),
            Completion::Clear => g.completed_at = None,
            Completion::Keep => {}
        }
        if let Some(status) = self.status {
            g.status = status;
        }
        if let Some(images) = self.output_images {
            g.output_images = images;
        }
        if let Some(msg) = self.error_message {
            g.error_message = msg;
        }
    }
}

/// Listing filter for a single owner.
#[derive(Debug, Clone, Copy)]
pub struct GenerationFilter {
    pub kind: Option<GenerationType>,
    pub limit: i64,
    pub offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Generation {
        Generation {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            kind: GenerationType::TryOn,
            status: GenerationStatus::Pending,
            input_images: vec![],
            output_images: vec![],
            parameters: serde_json::json!({}),
            error_message: None,
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
        }
    }

    #[test]
    fn type_serializes_with_wire_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["type"], "try_on");
        assert_eq!(json["status"], "pending");
        let parsed: GenerationType = serde_json::from_str("\"tryon\"").unwrap();
        assert_eq!(parsed, GenerationType::TryOn);
        assert!("video".parse::<GenerationType>().is_err());
    }

    #[test]
    fn terminal_status_stamps_completed_at() {
        let now = OffsetDateTime::now_utc();
        for status in [GenerationStatus::Completed, GenerationStatus::Failed] {
            let mut g = sample();
            GenerationPatch { status: Some(status), ..Default::default() }.apply(&mut g, now);
            assert_eq!(g.completed_at, Some(now));
        }
    }

    #[test]
    fn non_terminal_updates_leave_completed_at_unset() {
        let now = OffsetDateTime::now_utc();
        let mut g = sample();
        GenerationPatch {
            status: Some(GenerationStatus::Processing),
            ..Default::default()
        }
        .apply(&mut g, now);
        assert_eq!(g.completed_at, None);

        GenerationPatch {
            error_message: Some(Some("boom".into())),
            ..Default::default()
        }
        .apply(&mut g, now);
        assert_eq!(g.completed_at, None);
        assert_eq!(g.error_message.as_deref(), Some("boom"));

        // absent leaves the message, explicit null clears it
        GenerationPatch::default().apply(&mut g, now);
        assert_eq!(g.error_message.as_deref(), Some("boom"));
        GenerationPatch {
            error_message: Some(None),
            ..Default::default()
        }
        .apply(&mut g, now);
        assert_eq!(g.error_message, None);
    }

    #[test]
    fn reopening_clears_completed_at() {
        let now = OffsetDateTime::now_utc();
        let mut g = sample();
        g.status = GenerationStatus::Failed;
        g.completed_at = Some(now);
        GenerationPatch {
            status: Some(GenerationStatus::Pending),
            ..Default::default()
        }
        .apply(&mut g, now);
        assert_eq!(g.completed_at, None);
        assert_eq!(g.status, GenerationStatus::Pending);
    }
}
