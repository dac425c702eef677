use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum shape an entity must have to be cached and reconciled.
///
/// `updated_at` is the remote's last-modified timestamp (RFC 3339). It is
/// optional because the remote may omit it; such records cannot be compared.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn id(&self) -> &str;

    fn updated_at(&self) -> Option<&str>;

    /// The remote timestamp parsed for comparison, if present and valid.
    fn remote_updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at().and_then(parse_timestamp)
    }
}

/// Whether the local copy has been confirmed by the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Local changes not yet confirmed written to the remote.
    Local,
    /// Matches (or derives from) a successful remote response.
    Synced,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Local => "local",
            SyncState::Synced => "synced",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "local" => Some(SyncState::Local),
            "synced" => Some(SyncState::Synced),
            _ => None,
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One cached entity in a collection table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRecord<T> {
    pub id: String,
    /// When the local cache last wrote this row, not the remote timestamp.
    pub updated_at: DateTime<Utc>,
    pub sync_state: SyncState,
    pub data: T,
}

impl<T> LocalRecord<T> {
    pub fn new(
        id: impl Into<String>,
        updated_at: DateTime<Utc>,
        sync_state: SyncState,
        data: T,
    ) -> Self {
        Self {
            id: id.into(),
            updated_at,
            sync_state,
            data,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.sync_state == SyncState::Synced
    }
}

impl<T: Serialize> LocalRecord<T> {
    /// Converts the payload to untyped JSON, as carried by change events.
    pub fn to_json(&self) -> Result<LocalRecord<serde_json::Value>, serde_json::Error> {
        Ok(LocalRecord {
            id: self.id.clone(),
            updated_at: self.updated_at,
            sync_state: self.sync_state,
            data: serde_json::to_value(&self.data)?,
        })
    }
}

impl LocalRecord<serde_json::Value> {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<LocalRecord<T>, serde_json::Error> {
        Ok(LocalRecord {
            id: self.id.clone(),
            updated_at: self.updated_at,
            sync_state: self.sync_state,
            data: serde_json::from_value(self.data.clone())?,
        })
    }
}

/// Fixed-width RFC 3339 so stored stamps also sort lexically.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        #[serde(rename = "updatedAt")]
        updated_at: Option<String>,
    }

    impl Entity for Note {
        fn id(&self) -> &str {
            &self.id
        }

        fn updated_at(&self) -> Option<&str> {
            self.updated_at.as_deref()
        }
    }

    #[test]
    fn test_sync_state_parse() {
        assert_eq!(SyncState::parse("local"), Some(SyncState::Local));
        assert_eq!(SyncState::parse("SYNCED"), Some(SyncState::Synced));
        assert_eq!(SyncState::parse("pending"), None);
    }

    #[test]
    fn test_sync_state_serializes_lowercase() {
        assert_eq!(serde_json::to_value(SyncState::Synced).unwrap(), json!("synced"));
    }

    #[test]
    fn test_remote_updated_at_parses_offsets() {
        let note = Note {
            id: "1".into(),
            updated_at: Some("2024-01-01T02:00:00+02:00".into()),
        };
        assert_eq!(
            note.remote_updated_at(),
            parse_timestamp("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_remote_updated_at_invalid_is_none() {
        let note = Note {
            id: "1".into(),
            updated_at: Some("yesterday".into()),
        };
        assert!(note.remote_updated_at().is_none());
    }

    #[test]
    fn test_format_timestamp_is_fixed_width() {
        let a = parse_timestamp("2024-01-01T00:00:00Z").unwrap();
        let b = parse_timestamp("2024-01-01T00:00:00.5Z").unwrap();
        assert_eq!(format_timestamp(&a), "2024-01-01T00:00:00.000000Z");
        assert!(format_timestamp(&a) < format_timestamp(&b));
    }

    #[test]
    fn test_json_round_trip_of_record() {
        let now = parse_timestamp("2024-03-01T10:00:00Z").unwrap();
        let record = LocalRecord::new(
            "n1",
            now,
            SyncState::Local,
            Note {
                id: "n1".into(),
                updated_at: None,
            },
        );
        let json = record.to_json().unwrap();
        assert_eq!(json.data["id"], "n1");

        let decoded: LocalRecord<Note> = json.decode().unwrap();
        assert_eq!(decoded, record);
    }
}
