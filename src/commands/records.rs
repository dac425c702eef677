use clap::{Args, Subcommand, ValueEnum};
use serde_json::Value;
use survey_sync_core::{LocalRecord, LocalStore, SyncState};

use super::{truncate, OutputFormat};

#[derive(Clone, Copy, ValueEnum)]
pub enum StateFilter {
    Local,
    Synced,
}

impl From<StateFilter> for SyncState {
    fn from(filter: StateFilter) -> Self {
        match filter {
            StateFilter::Local => SyncState::Local,
            StateFilter::Synced => SyncState::Synced,
        }
    }
}

#[derive(Args)]
pub struct RecordsCommand {
    #[command(subcommand)]
    pub command: RecordsSubcommand,
}

#[derive(Subcommand)]
pub enum RecordsSubcommand {
    /// List cached records in a collection
    List {
        /// Collection name (e.g., surveys, phrases)
        collection: String,

        /// Only show records in this sync state
        #[arg(long, value_enum)]
        state: Option<StateFilter>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one cached record
    Show {
        collection: String,

        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List collections present in the cache
    Collections,
}

impl RecordsCommand {
    pub async fn run(&self, store: &LocalStore) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            RecordsSubcommand::List {
                collection,
                state,
                format,
            } => {
                let records: Vec<LocalRecord<Value>> = match state {
                    Some(state) => store.list_by_state(collection, (*state).into()).await?,
                    None => store.list(collection).await?,
                };

                if records.is_empty() {
                    println!("No records found in '{}'", collection);
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&records)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<36}  {:<6}  {:<19}  SUMMARY", "ID", "STATE", "UPDATED");
                        println!("{}", "-".repeat(90));
                        for record in &records {
                            println!(
                                "{:<36}  {:<6}  {:<19}  {}",
                                truncate(&record.id, 36),
                                record.sync_state,
                                record.updated_at.format("%Y-%m-%d %H:%M:%S"),
                                truncate(&summary(&record.data), 40)
                            );
                        }
                        println!("\nTotal: {} record(s)", records.len());
                    }
                }
                Ok(())
            }

            RecordsSubcommand::Show {
                collection,
                id,
                format,
            } => {
                let record: LocalRecord<Value> = store
                    .get(collection, id)
                    .await?
                    .ok_or_else(|| format!("Record not found: {}/{}", collection, id))?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&record)?);
                    }
                    OutputFormat::Text => {
                        println!("{}/{}", collection, record.id);
                        println!("State:   {}", record.sync_state);
                        println!("Updated: {}", record.updated_at.to_rfc3339());
                        println!();
                        println!("{}", serde_json::to_string_pretty(&record.data)?);
                    }
                }
                Ok(())
            }

            RecordsSubcommand::Collections => {
                let collections = store.collections().await?;
                if collections.is_empty() {
                    println!("Cache is empty");
                    return Ok(());
                }

                println!("{:<30}  {:>8}  {:>8}", "COLLECTION", "LOCAL", "SYNCED");
                println!("{}", "-".repeat(50));
                for collection in &collections {
                    let local = store.count(collection, Some(SyncState::Local)).await?;
                    let synced = store.count(collection, Some(SyncState::Synced)).await?;
                    println!("{:<30}  {:>8}  {:>8}", collection, local, synced);
                }
                Ok(())
            }
        }
    }
}

/// One-line description of a record: its `name` or `title`, else compact JSON.
fn summary(data: &Value) -> String {
    ["name", "title", "imagePath"]
        .iter()
        .find_map(|key| data.get(key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| data.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summary_prefers_name() {
        assert_eq!(summary(&json!({ "id": "1", "name": "Kitchen" })), "Kitchen");
        assert_eq!(summary(&json!({ "id": "1", "title": "Report" })), "Report");
        assert_eq!(summary(&json!({ "id": "1" })), r#"{"id":"1"}"#);
    }
}
