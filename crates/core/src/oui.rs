//! IEEE OUI registry: MAC prefix to manufacturer resolution.
//!
//! Ships with an embedded snapshot of the IEEE CSV so lookups work
//! offline; optionally persists to a cache directory and refreshes itself
//! from the IEEE website when the cached data is older than 30 days.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::header;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Snapshot of the IEEE MA-L assignment CSV, baked in at compile time.
static EMBEDDED_CSV: &[u8] = include_bytes!("../data/oui.csv");

const IEEE_CSV_URL: &str = "https://standards-oui.ieee.org/oui/oui.csv";
const CACHE_FILE: &str = "oui.csv";
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_AGE_DAYS: i64 = 30;
const ACCEPT_HEADER: &str = "text/csv,application/vnd.ms-excel;q=0.9,*/*;q=0.8";

/// Thread-safe OUI prefix map with optional on-disk cache.
///
/// Lookups take a read lock; [`refresh`](OuiRegistry::refresh) swaps the
/// whole map under the write lock, so readers never see partial data.
#[derive(Debug)]
pub struct OuiRegistry {
    prefixes: RwLock<HashMap<String, String>>,
    loaded_at: RwLock<DateTime<Utc>>,
    cache_path: Option<PathBuf>,
}

impl OuiRegistry {
    /// Create a registry from the embedded data, or from `cache_dir`'s
    /// `oui.csv` when one exists. A missing cache file is seeded with the
    /// embedded bytes so later refreshes have somewhere to persist.
    ///
    /// When the loaded data is older than 30 days and a cache directory is
    /// configured, a one-time background refresh is started (requires a
    /// running Tokio runtime; without one the refresh is skipped).
    pub fn new(cache_dir: Option<PathBuf>) -> Result<Arc<Self>> {
        let cache_path = cache_dir.map(|d| d.join(CACHE_FILE));

        let mut data: Vec<u8> = EMBEDDED_CSV.to_vec();
        let mut loaded_at = Utc::now();

        if let Some(path) = &cache_path {
            match std::fs::read(path) {
                Ok(bytes) => {
                    loaded_at = std::fs::metadata(path)
                        .and_then(|m| m.modified())
                        .map(DateTime::<Utc>::from)
                        .unwrap_or_else(|_| Utc::now());
                    debug!(path = %path.display(), bytes = bytes.len(), "loaded OUI data from cache");
                    data = bytes;
                }
                Err(err) => {
                    debug!(path = %path.display(), %err, "OUI cache not available, seeding with embedded data");
                    if let Some(parent) = path.parent() {
                        if std::fs::create_dir_all(parent).is_ok() {
                            if let Err(err) = std::fs::write(path, &data) {
                                debug!(%err, "failed to seed OUI cache file");
                            }
                        }
                    }
                }
            }
        }

        let prefixes = parse_csv(&data)?;
        debug!(entries = prefixes.len(), "OUI registry initialised");

        let registry = Arc::new(Self {
            prefixes: RwLock::new(prefixes),
            loaded_at: RwLock::new(loaded_at),
            cache_path,
        });

        let age = Utc::now() - loaded_at;
        if registry.cache_path.is_some() && age > ChronoDuration::days(MAX_AGE_DAYS) {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                info!(age_days = age.num_days(), "OUI data is stale, refreshing in the background");
                let reg = Arc::clone(&registry);
                handle.spawn(async move {
                    if let Err(err) = reg.refresh().await {
                        debug!(%err, "background OUI refresh failed");
                    }
                });
            }
        }

        Ok(registry)
    }

    /// Build a registry directly from CSV bytes. No cache, no refresh.
    pub fn from_bytes(data: &[u8]) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            prefixes: RwLock::new(parse_csv(data)?),
            loaded_at: RwLock::new(Utc::now()),
            cache_path: None,
        }))
    }

    /// Resolve a MAC address to its manufacturer.
    ///
    /// Accepts colon, dash, or dot separated forms as well as bare hex, in
    /// any case; only the first three bytes are used.
    pub fn lookup(&self, mac: &str) -> Option<String> {
        let prefix = normalize_mac_prefix(mac)?;
        self.prefixes.read().unwrap().get(&prefix).cloned()
    }

    /// Number of known prefixes.
    pub fn len(&self) -> usize {
        self.prefixes.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// When the current data set was loaded.
    pub fn loaded_at(&self) -> DateTime<Utc> {
        *self.loaded_at.read().unwrap()
    }

    /// Download the latest IEEE CSV, swap it in, and persist it to the
    /// cache file when one is configured. Existing data stays usable if
    /// the refresh fails.
    pub async fn refresh(&self) -> Result<()> {
        let client = reqwest::Client::builder().timeout(CLIENT_TIMEOUT).build()?;
        let response = client
            .get(IEEE_CSV_URL)
            .header(header::USER_AGENT, crate::USER_AGENT)
            .header(header::ACCEPT, ACCEPT_HEADER)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::OuiFetchStatus {
                status: status.as_u16(),
            });
        }

        let data = response.bytes().await?;
        let prefixes = parse_csv(&data)?;
        let entries = prefixes.len();

        {
            let mut map = self.prefixes.write().unwrap();
            *map = prefixes;
        }
        *self.loaded_at.write().unwrap() = Utc::now();
        info!(entries, "OUI registry refreshed from IEEE");

        if let Some(path) = &self.cache_path {
            if let Some(parent) = path.parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
            if let Err(err) = tokio::fs::write(path, &data).await {
                warn!(path = %path.display(), %err, "failed to persist refreshed OUI data");
            }
        }

        Ok(())
    }
}

/// Parse the IEEE CSV: header row, then `assignment-type,prefix,org,addr`.
/// Rows with short prefixes or empty organisations are skipped; the first
/// occurrence of a prefix wins.
fn parse_csv(data: &[u8]) -> Result<HashMap<String, String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(data);

    let header = reader.headers()?;
    if header.len() < 3 {
        return Err(Error::OuiFormat {
            reason: format!("expected at least 3 columns, got {}", header.len()),
        });
    }

    let mut map = HashMap::new();
    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(_) => continue,
        };
        let prefix_field = record.get(1).map(str::trim).unwrap_or_default();
        let org = record.get(2).map(str::trim).unwrap_or_default();
        if prefix_field.is_empty() || org.is_empty() {
            continue;
        }
        let Some(prefix) = normalize_mac_prefix(prefix_field) else {
            continue;
        };
        map.entry(prefix).or_insert_with(|| org.to_string());
    }

    Ok(map)
}

/// Normalise any MAC representation to its 6-hex-digit uppercase prefix.
/// Returns `None` when fewer than 6 hex digits remain after stripping
/// separators.
pub(crate) fn normalize_mac_prefix(mac: &str) -> Option<String> {
    let cleaned: String = mac
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect::<String>()
        .to_uppercase();
    if cleaned.len() < 6 {
        return None;
    }
    Some(cleaned[..6].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_CSV: &[u8] = b"Registry,Assignment,Organization Name,Organization Address\n\
MA-L,AABBCC,Acme,1 Acme Way\n\
MA-L,AA-BB-CD,Widget Corp,2 Widget Ave\n\
MA-L,AABBCE,,empty org is skipped\n\
MA-L,AABB,too short,skipped\n\
MA-L,AABBCC,Duplicate Ignored,first wins\n";

    #[test]
    fn lookup_accepts_all_separator_styles() {
        let reg = OuiRegistry::from_bytes(TEST_CSV).unwrap();
        assert_eq!(reg.lookup("aa:bb:cc:dd:ee:ff").as_deref(), Some("Acme"));
        assert_eq!(reg.lookup("AA-BB-CC-11-22-33").as_deref(), Some("Acme"));
        assert_eq!(reg.lookup("AABBCCDDEEFF").as_deref(), Some("Acme"));
        assert_eq!(reg.lookup("aabb.ccdd.eeff").as_deref(), Some("Acme"));
        assert_eq!(reg.lookup(""), None);
        assert_eq!(reg.lookup("AABB"), None);
    }

    #[test]
    fn parse_skips_bad_rows_and_keeps_first_duplicate() {
        let reg = OuiRegistry::from_bytes(TEST_CSV).unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.lookup("AA:BB:CD:00:00:00").as_deref(), Some("Widget Corp"));
        assert_eq!(reg.lookup("AA:BB:CE:00:00:00"), None);
        assert_eq!(reg.lookup("AABBCC000000").as_deref(), Some("Acme"));
    }

    #[test]
    fn parse_rejects_truncated_header() {
        let err = OuiRegistry::from_bytes(b"only,two\n").unwrap_err();
        assert!(err.to_string().contains("CSV"));
    }

    #[test]
    fn embedded_data_parses() {
        let reg = OuiRegistry::from_bytes(EMBEDDED_CSV).unwrap();
        assert!(!reg.is_empty());
        // Xerox holds the very first assignment.
        assert!(reg.lookup("00:00:00:01:02:03").is_some());
    }

    #[test]
    fn normalize_prefix_variants() {
        for form in [
            "AA:BB:CC:DD:EE:FF",
            "aa-bb-cc-dd-ee-ff",
            "AABBCCDDEEFF",
            "aabb.ccdd.eeff",
            "Aa:Bb:Cc",
        ] {
            assert_eq!(normalize_mac_prefix(form).as_deref(), Some("AABBCC"));
        }
        assert_eq!(normalize_mac_prefix("AABBC"), None);
        assert_eq!(normalize_mac_prefix(""), None);
    }

    #[test]
    fn cache_dir_is_seeded_with_embedded_data() {
        let dir = tempfile::tempdir().unwrap();
        let reg = OuiRegistry::new(Some(dir.path().to_path_buf())).unwrap();
        assert!(!reg.is_empty());
        assert!(dir.path().join("oui.csv").exists());
    }

    #[test]
    fn cache_file_is_preferred_over_embedded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("oui.csv"),
            b"Registry,Assignment,Organization Name,Organization Address\nMA-L,123456,Cache Co,\n",
        )
        .unwrap();
        let reg = OuiRegistry::new(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.lookup("12:34:56:00:00:00").as_deref(), Some("Cache Co"));
    }
}
