use serde::{Deserialize, Serialize};

use super::model::{Generation, GenerationStatus, GenerationType, ImageData};
use crate::users::dto::double_option;

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Unknown values are ignored rather than rejected.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListQuery {
    pub fn kind(&self) -> Option<GenerationType> {
        self.kind.as_deref().and_then(|k| k.parse().ok())
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationList {
    pub total: i64,
    pub items: Vec<Generation>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateGenerationRequest {
    #[serde(rename = "type")]
    pub kind: Option<GenerationType>,
    pub input_images: Option<Vec<ImageData>>,
    pub parameters: Option<serde_json::Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateGenerationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<GenerationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_images: Option<Vec<ImageData>>,
    /// `null` clears the stored message; absent leaves it.
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub error_message: Option<Option<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(kind: Option<&str>, limit: Option<i64>, offset: Option<i64>) -> ListQuery {
        ListQuery { kind: kind.map(str::to_string), limit, offset }
    }

    #[test]
    fn pagination_defaults_and_clamps() {
        let q = query(None, None, None);
        assert_eq!((q.limit(), q.offset()), (DEFAULT_LIMIT, 0));
        let q = query(None, Some(10_000), Some(-5));
        assert_eq!((q.limit(), q.offset()), (MAX_LIMIT, 0));
        assert_eq!(query(None, Some(0), None).limit(), 1);
    }

    #[test]
    fn unknown_type_filter_is_ignored() {
        assert_eq!(query(Some("video"), None, None).kind(), None);
        assert_eq!(query(Some("swap"), None, None).kind(), Some(GenerationType::Swap));
    }
}
