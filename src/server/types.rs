use serde::{Deserialize, Serialize};

/// Generic API response wrapper
#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            data: Some(data),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            message: Some(message.into()),
        }
    }
}

/// Body of the enable/disable toggle endpoint
#[derive(Deserialize)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

/// Body of the tier override endpoint
#[derive(Deserialize)]
pub struct SetTierRequest {
    pub tier: crate::registry::Tier,
}

/// Scan endpoint payload
#[derive(Serialize, Deserialize)]
pub struct ScanResponse {
    pub new_models: usize,
    pub removed_models: usize,
    pub failed_models: usize,
}

/// Fleet start endpoint payload
#[derive(Serialize, Deserialize)]
pub struct FleetStartResponse {
    pub started: usize,
    pub failed: usize,
    pub skipped: usize,
}
