//! Sync CLI commands for reconciling the cache with the remote API.

use clap::{Args, Subcommand};
use survey_sync_core::{HttpCollection, JsonEntity, LocalStore, SyncCollection, SyncState};

use super::remote_collection;
use crate::config::Config;

type RemoteRecords = SyncCollection<JsonEntity, HttpCollection<JsonEntity>>;

/// Sync with the remote API
#[derive(Debug, Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: SyncSubcommand,
}

#[derive(Debug, Subcommand)]
enum SyncSubcommand {
    /// Fetch a collection from the remote and apply newer records
    Pull {
        collection: String,
    },

    /// Push records that were never confirmed by the remote
    Push {
        collection: String,
    },

    /// Show remote configuration and pending counts
    Status,
}

impl SyncCommand {
    pub async fn run(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            SyncSubcommand::Pull { collection } => {
                let records = self.collection(store, config, collection)?;
                let report = records.pull().await?;

                println!(
                    "Pulled '{}': {} fetched, {} applied, {} skipped",
                    collection, report.fetched, report.applied, report.skipped
                );
                Ok(())
            }

            SyncSubcommand::Push { collection } => {
                let records = self.collection(store, config, collection)?;
                let report = records.push_pending().await?;

                println!("Pushed '{}': {} record(s)", collection, report.pushed);
                for (id, error) in &report.failed {
                    println!("  ✗ {}: {}", id, error);
                }
                if !report.is_clean() {
                    return Err(format!("{} record(s) failed to push", report.failed.len()).into());
                }
                Ok(())
            }

            SyncSubcommand::Status => self.status(store, config).await,
        }
    }

    fn collection(
        &self,
        store: &LocalStore,
        config: &Config,
        collection: &str,
    ) -> Result<RemoteRecords, Box<dyn std::error::Error>> {
        let remote = remote_collection(config, collection)?;
        Ok(SyncCollection::new(store.clone(), remote, collection))
    }

    async fn status(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        println!("Sync Configuration");
        println!("==================");
        println!();

        match &config.remote.base_url {
            Some(url) => {
                println!("Remote:  {}", url);
                match &config.remote.api_key {
                    Some(key) => {
                        let prefix: String = key.chars().take(8).collect();
                        println!("API Key: {}...", prefix)
                    }
                    None => println!("API Key: (none)"),
                }
            }
            None => {
                println!("Status: Not configured");
                println!();
                println!("To enable sync, add to your config file:");
                println!();
                println!("  remote:");
                println!("    base_url: \"https://api.example.com/v1\"");
                println!("    api_key: \"your-api-key\"");
                println!();
                println!("Or set environment variables:");
                println!("  SURVEY_SYNC_REMOTE_URL");
                println!("  SURVEY_SYNC_API_KEY");
            }
        }
        println!();

        let collections = store.collections().await?;
        if collections.is_empty() {
            println!("Cache is empty");
            return Ok(());
        }

        for collection in &collections {
            let pending = store.count(collection, Some(SyncState::Local)).await?;
            let total = store.count(collection, None).await?;
            let marker = if pending == 0 { "✓" } else { "…" };
            println!(
                "  {} {} ({} of {} pending)",
                marker, collection, pending, total
            );
        }
        Ok(())
    }
}
