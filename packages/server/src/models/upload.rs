use assets::ChunkOutcome;
use serde::Serialize;

/// Response for a direct upload.
#[derive(Serialize, utoipa::ToSchema)]
pub struct UploadResponse {
    /// Public URLs of the stored files, in the order the `file` fields arrived.
    #[schema(example = json!(["/upload/image/article/7243124430342144.png"]))]
    pub urls: Vec<String>,
}

#[derive(Serialize, utoipa::ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Progress,
    Duplicate,
    Complete,
}

/// Response for one chunk of a chunked upload.
#[derive(Serialize, utoipa::ToSchema)]
pub struct ChunkResponse {
    pub status: ChunkStatus,
    /// Distinct chunks staged so far. Absent once complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = 3)]
    pub received: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = 8)]
    pub total: Option<u32>,
    /// Public URL of the merged file. Only set when complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ChunkResponse {
    pub fn from_outcome(outcome: ChunkOutcome, url_of: impl FnOnce(&str) -> String) -> Self {
        match outcome {
            ChunkOutcome::Progress { received, total } => Self {
                status: ChunkStatus::Progress,
                received: Some(received),
                total: Some(total),
                url: None,
            },
            ChunkOutcome::Duplicate { received, total } => Self {
                status: ChunkStatus::Duplicate,
                received: Some(received),
                total: Some(total),
                url: None,
            },
            ChunkOutcome::Complete(asset) => Self {
                status: ChunkStatus::Complete,
                received: None,
                total: None,
                url: Some(url_of(&asset.key)),
            },
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == ChunkStatus::Complete
    }
}
