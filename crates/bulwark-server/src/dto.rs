use bulwark_core::models::ExtractionResult;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ReadRequest {
    /// Article URL to read (http/https only)
    pub url: String,
    /// Skip the cache and re-extract (default: false)
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ReadResponse {
    /// Extraction result: `originalUrl`, `status`, `archiveUrl`, `title`,
    /// `notes`, `paragraphs`, `checkedAt`
    #[schema(value_type = Object)]
    pub entry: ExtractionResult,
}

// ---------------------------------------------------------------------------
// Image
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ImageQuery {
    /// Remote image URL
    pub url: String,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub cache: &'static str,
    pub database: &'static str,
    pub primary_circuit: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
