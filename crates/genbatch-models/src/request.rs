//! Image generation request and result payloads.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::ItemId;

/// Fallback name when a file path has no usable final segment.
pub const DEFAULT_DOWNLOAD_NAME: &str = "generated-image.png";

/// Maximum prompt length accepted by the generation service.
pub const MAX_PROMPT_LENGTH: usize = 4000;

fn default_size() -> String {
    "1792x1024".to_string()
}

fn default_quality() -> String {
    "hd".to_string()
}

fn default_style() -> String {
    "vivid".to_string()
}

/// One image to generate.
///
/// `file_path` doubles as the item identity and the export location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct GenerationRequest {
    #[validate(length(min = 1, max = 4000))]
    pub prompt: String,
    #[validate(length(min = 1, max = 512))]
    pub file_path: String,
    #[serde(default = "default_size")]
    pub size: String,
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default = "default_style")]
    pub style: String,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            file_path: file_path.into(),
            size: default_size(),
            quality: default_quality(),
            style: default_style(),
        }
    }

    pub fn item_id(&self) -> ItemId {
        ItemId::new(self.file_path.clone())
    }

    /// File name used when the generated image is exported.
    pub fn download_file_name(&self) -> &str {
        self.file_path
            .rsplit('/')
            .next()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(DEFAULT_DOWNLOAD_NAME)
    }
}

/// Successful generation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GeneratedImage {
    /// Hosted URL or `data:` URL of the image
    pub image_url: String,
    /// Name the image should be exported under
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}
