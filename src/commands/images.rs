use clap::{Args, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use survey_sync_core::images::COLLECTION;
use survey_sync_core::{
    HttpCollection, HttpImageUploader, ImageMetadata, ImageStore, LocalStore, UploadOptions,
    UploadOutcome,
};

use super::{remote_collection, truncate, OutputFormat};
use crate::config::Config;

type RemoteImages = ImageStore<HttpCollection<ImageMetadata>, HttpImageUploader>;

#[derive(Args)]
pub struct ImagesCommand {
    #[command(subcommand)]
    pub command: ImagesSubcommand,
}

#[derive(Subcommand)]
pub enum ImagesSubcommand {
    /// List cached images
    List {
        /// Show archived images instead of active ones
        #[arg(long)]
        archived: bool,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Upload an image file
    Upload {
        /// File to upload
        file: PathBuf,

        /// Object path on the remote (e.g., surveys/s1/front.jpg)
        #[arg(long)]
        path: String,
    },

    /// Hide an image from the active set
    Archive { id: String },

    /// Restore an archived image
    Unarchive { id: String },

    /// Retry uploads whose content is still queued locally
    Retry,
}

impl ImagesCommand {
    pub async fn run(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ImagesSubcommand::List { archived, format } => {
                let images: Vec<ImageMetadata> = store
                    .list::<ImageMetadata>(COLLECTION)
                    .await?
                    .into_iter()
                    .map(|r| r.data)
                    .filter(|m| m.is_archived == *archived)
                    .collect();

                if images.is_empty() {
                    println!("No images found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&images)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<36}  {:<8}  {:>10}  PATH", "ID", "UPLOAD", "SIZE");
                        println!("{}", "-".repeat(90));
                        for image in &images {
                            println!(
                                "{:<36}  {:<8}  {:>10}  {}",
                                image.id,
                                image.upload_status,
                                image.size,
                                truncate(&image.image_path, 30)
                            );
                        }
                        println!("\nTotal: {} image(s)", images.len());
                    }
                }
                Ok(())
            }

            ImagesSubcommand::Upload { file, path } => {
                let bytes = std::fs::read(file)
                    .map_err(|e| format!("Failed to read '{}': {}", file.display(), e))?;

                let mut opts = UploadOptions::default().on_progress(|percent| {
                    print!("\rUploading... {:>3}%", percent);
                    let _ = io::stdout().flush();
                });
                if let Some(name) = file.file_name().and_then(|n| n.to_str()) {
                    opts = opts.file_name(name);
                }
                if let Some(content_type) = content_type_for(file) {
                    opts = opts.content_type(content_type);
                }

                let images = self.image_store(store, config)?;
                let outcome = images.upload_image(bytes, path, opts).await;
                println!();

                match outcome? {
                    UploadOutcome::Uploaded(image) => {
                        println!("Uploaded image:");
                        println!("{}", image);
                    }
                    UploadOutcome::Duplicate(image) => {
                        println!("Same content already uploaded as {}", image.id);
                    }
                    UploadOutcome::Restored(image) => {
                        println!("Restored archived image {}", image.id);
                    }
                }
                Ok(())
            }

            ImagesSubcommand::Archive { id } => {
                let image = self.image_store(store, config)?.archive_image(id).await?;
                println!("Archived image: {}", image.image_path);
                Ok(())
            }

            ImagesSubcommand::Unarchive { id } => {
                let image = self.image_store(store, config)?.unarchive_image(id).await?;
                println!("Restored image: {}", image.image_path);
                Ok(())
            }

            ImagesSubcommand::Retry => {
                let report = self.image_store(store, config)?.retry_failed_uploads().await?;

                println!(
                    "Retried uploads: {} uploaded, {} orphaned",
                    report.uploaded, report.orphaned
                );
                for (id, error) in &report.failed {
                    println!("  ✗ {}: {}", id, error);
                }
                if !report.failed.is_empty() {
                    return Err(format!("{} upload(s) still failing", report.failed.len()).into());
                }
                Ok(())
            }
        }
    }

    fn image_store(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<RemoteImages, Box<dyn std::error::Error>> {
        let remote = remote_collection(config, COLLECTION)?;
        let images_url = config
            .remote
            .images_url()
            .ok_or("Remote not configured. Set remote.base_url in the config file.")?;

        let uploader = match &config.remote.api_key {
            Some(key) => HttpImageUploader::new(images_url).with_api_key(key.clone()),
            None => HttpImageUploader::new(images_url),
        };
        Ok(ImageStore::open(store.clone(), remote, uploader))
    }
}

fn content_type_for(file: &Path) -> Option<&'static str> {
    let extension = file.extension()?.to_str()?.to_lowercase();
    match extension.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}
