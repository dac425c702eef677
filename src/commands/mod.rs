mod config_cmd;
mod images;
mod records;
mod sync_cmd;

pub use config_cmd::ConfigCommand;
pub use images::ImagesCommand;
pub use records::RecordsCommand;
pub use sync_cmd::SyncCommand;

use clap::ValueEnum;
use survey_sync_core::{Entity, HttpCollection};

use crate::config::Config;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Builds the HTTP adapter for `collection`, or explains how to configure one.
pub fn remote_collection<T: Entity>(
    config: &Config,
    collection: &str,
) -> Result<HttpCollection<T>, Box<dyn std::error::Error>> {
    let Some(base_url) = &config.remote.base_url else {
        return Err(
            "Remote not configured. Set remote.base_url in the config file or SURVEY_SYNC_REMOTE_URL."
                .into(),
        );
    };

    let remote = HttpCollection::new(base_url.clone(), collection);
    Ok(match &config.remote.api_key {
        Some(key) => remote.with_api_key(key.clone()),
        None => remote,
    })
}

/// Shortens `s` to `width` characters for table output.
pub fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let kept: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use survey_sync_core::JsonEntity;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer name", 10), "a much ...");
    }

    #[test]
    fn test_remote_collection_requires_base_url() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(temp_dir.path().join("none.yaml"))).unwrap();
        let result = remote_collection::<JsonEntity>(&config, "surveys");
        assert!(result.unwrap_err().to_string().contains("Remote not configured"));
    }
}
