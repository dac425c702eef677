use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::record::Entity;

/// Where an image's binary content is in its upload lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    #[default]
    Pending,
    Uploaded,
    Failed,
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploaded => "uploaded",
            UploadStatus::Failed => "failed",
        };
        f.pad(s)
    }
}

/// Metadata for an image attached to a survey.
///
/// Archived images are hidden from the active set but stay retrievable and
/// can be restored without uploading the content again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub id: String,
    pub image_path: String,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_data_url: Option<String>,
    #[serde(default)]
    pub upload_status: UploadStatus,
    #[serde(default)]
    pub upload_progress: u8,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl ImageMetadata {
    pub fn new(image_path: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            image_path: image_path.into(),
            is_archived: false,
            thumbnail_data_url: None,
            upload_status: UploadStatus::Pending,
            upload_progress: 0,
            content_hash: content_hash.into(),
            file_name: None,
            content_type: None,
            size: 0,
            updated_at: None,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_thumbnail(mut self, data_url: impl Into<String>) -> Self {
        self.thumbnail_data_url = Some(data_url.into());
        self
    }

    pub fn is_active(&self) -> bool {
        !self.is_archived
    }

    pub fn is_uploaded(&self) -> bool {
        self.upload_status == UploadStatus::Uploaded
    }
}

impl Entity for ImageMetadata {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Option<&str> {
        self.updated_at.as_deref()
    }
}

impl fmt::Display for ImageMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.image_path)?;
        writeln!(f, "{}", "=".repeat(self.image_path.len()))?;
        writeln!(f, "ID:       {}", self.id)?;
        if let Some(name) = &self.file_name {
            writeln!(f, "File:     {}", name)?;
        }
        if let Some(content_type) = &self.content_type {
            writeln!(f, "Type:     {}", content_type)?;
        }
        writeln!(f, "Size:     {} bytes", self.size)?;
        writeln!(
            f,
            "Upload:   {} ({}%)",
            self.upload_status, self.upload_progress
        )?;
        writeln!(f, "Archived: {}", if self.is_archived { "yes" } else { "no" })?;
        write!(f, "Hash:     {}", self.content_hash)
    }
}

/// Encodes bytes as a `data:` URL for the thumbnail cache.
pub fn data_url(content_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", content_type, STANDARD.encode(bytes))
}
