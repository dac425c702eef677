mod image;
mod json;
mod record;

pub use image::{data_url, ImageMetadata, UploadStatus};
pub use json::JsonEntity;
pub use record::{format_timestamp, parse_timestamp, Entity, LocalRecord, SyncState};
