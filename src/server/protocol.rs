use crate::registry::ClassDescriptor;
use serde::{Deserialize, Serialize};

/// An image upload as JSON, encoded as base 64
#[derive(Deserialize)]
pub struct Base64Upload {
    pub filename: Option<String>,
    pub image: Option<String>,
}

#[derive(Serialize)]
pub struct ClassesResponse {
    pub classes: &'static [ClassDescriptor],
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub backend: &'static str,
    pub classes: usize,
}
