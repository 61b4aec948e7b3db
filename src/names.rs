//! Timestamped object names.
//!
//! Every versioned object (schema, fragment, commit marker, metadata file,
//! consolidation manifest) is named `__<t1>_<t2>_<uuid>[_<v>][.<ext>]`.
//! Older fragments used `__<uuid>_<t1>` or `__<uuid>_<t1>_<t2>`, and the
//! oldest arrays keep one schema at `__array_schema.tdb`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use regex_lite::Regex;

use crate::error::{Result, StorageError};
use crate::uri::Uri;

/// Format version appended to fragment names.
pub const FORMAT_VERSION: u32 = 1;

pub const LEGACY_SCHEMA_FILENAME: &str = "__array_schema.tdb";

pub const VACUUM_FILE_SUFFIX: &str = ".vac";
pub const META_FILE_SUFFIX: &str = ".meta";
pub const WRITE_FILE_SUFFIX: &str = ".wrt";

static UUID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn current_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^__(\d+)_(\d+)_([0-9a-f]{32})(?:_(\d+))?(?:\.(vac|meta|wrt|ok|tdb))?$")
            .expect("static regex")
    })
}

fn legacy_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^__([0-9a-f]{32})_(\d+)(?:_(\d+))?(?:\.(vac|meta|wrt|ok|tdb))?$")
            .expect("static regex")
    })
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// 32 lowercase hex characters, unique per process and call.
pub fn generate_uuid() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut hasher = blake3::Hasher::new();
    hasher.update(&nanos.to_le_bytes());
    hasher.update(&std::process::id().to_le_bytes());
    hasher.update(&UUID_COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    hasher.update(format!("{:?}", std::thread::current().id()).as_bytes());
    hasher.finalize().to_hex()[..32].to_string()
}

/// `__<t1>_<t2>_<uuid>`
pub fn timestamped_name(t1: u64, t2: u64, uuid: &str) -> String {
    format!("__{}_{}_{}", t1, t2, uuid)
}

/// `__<t1>_<t2>_<uuid>_<v>`
pub fn fragment_name(t1: u64, t2: u64, uuid: &str) -> String {
    format!("__{}_{}_{}_{}", t1, t2, uuid, FORMAT_VERSION)
}

/// Parsed form of a timestamped object URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedUri {
    pub uri: Uri,
    /// Last path component without the extension.
    pub name: String,
    pub timestamp_range: (u64, u64),
    pub uuid: String,
    pub format_version: Option<u32>,
    pub extension: Option<String>,
}

impl TimestampedUri {
    pub fn parse(uri: Uri) -> Result<Self> {
        let last = uri.last_path_part().to_string();
        if last == LEGACY_SCHEMA_FILENAME {
            return Ok(Self {
                name: last,
                uri,
                timestamp_range: (0, 0),
                uuid: String::new(),
                format_version: None,
                extension: None,
            });
        }

        if let Some(parsed) = Self::parse_current(&uri, &last) {
            return Ok(parsed);
        }
        if let Some(parsed) = Self::parse_legacy(&uri, &last) {
            return Ok(parsed);
        }
        Err(StorageError::InvalidUri(format!(
            "'{}' is not a timestamped name",
            uri
        )))
    }

    fn parse_current(uri: &Uri, last: &str) -> Option<Self> {
        let caps = current_re().captures(last)?;
        let t1 = caps.get(1)?.as_str().parse().ok()?;
        let t2 = caps.get(2)?.as_str().parse().ok()?;
        let format_version = match caps.get(4) {
            Some(m) => Some(m.as_str().parse().ok()?),
            None => None,
        };
        let extension = caps.get(5).map(|m| m.as_str().to_string());
        Some(Self {
            uri: uri.clone(),
            name: strip_extension(last).to_string(),
            timestamp_range: (t1, t2),
            uuid: caps.get(3)?.as_str().to_string(),
            format_version,
            extension,
        })
    }

    fn parse_legacy(uri: &Uri, last: &str) -> Option<Self> {
        let caps = legacy_re().captures(last)?;
        let t1 = caps.get(2)?.as_str().parse().ok()?;
        let t2 = match caps.get(3) {
            Some(m) => m.as_str().parse().ok()?,
            None => t1,
        };
        Some(Self {
            uri: uri.clone(),
            name: strip_extension(last).to_string(),
            timestamp_range: (t1, t2),
            uuid: caps.get(1)?.as_str().to_string(),
            format_version: None,
            extension: caps.get(4).map(|m| m.as_str().to_string()),
        })
    }

    pub fn timestamp_start(&self) -> u64 {
        self.timestamp_range.0
    }

    pub fn timestamp_end(&self) -> u64 {
        self.timestamp_range.1
    }

    pub fn has_extension(&self, ext: &str) -> bool {
        self.extension.as_deref() == Some(ext)
    }

    /// Window intersects `[start, end]`.
    pub fn intersects(&self, start: u64, end: u64) -> bool {
        self.timestamp_range.0 <= end && self.timestamp_range.1 >= start
    }

    /// Window lies fully inside `[start, end]`.
    pub fn contained_in(&self, start: u64, end: u64) -> bool {
        self.timestamp_range.0 >= start && self.timestamp_range.1 <= end
    }
}

fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) => &name[..idx],
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_parse_fragment_name() {
        let uri = Uri::new(format!("mem://a/__fragments/__10_20_{}_1", UUID));
        let t = TimestampedUri::parse(uri).unwrap();
        assert_eq!(t.timestamp_range, (10, 20));
        assert_eq!(t.uuid, UUID);
        assert_eq!(t.format_version, Some(1));
        assert_eq!(t.extension, None);
    }

    #[test]
    fn test_parse_with_extension() {
        let uri = Uri::new(format!("mem://a/__commits/__5_5_{}_1.vac", UUID));
        let t = TimestampedUri::parse(uri).unwrap();
        assert!(t.has_extension("vac"));
        assert_eq!(t.name, format!("__5_5_{}_1", UUID));

        let uri = Uri::new(format!("mem://a/__meta/__5_7_{}", UUID));
        let t = TimestampedUri::parse(uri).unwrap();
        assert_eq!(t.timestamp_range, (5, 7));
        assert_eq!(t.format_version, None);
    }

    #[test]
    fn test_parse_legacy_names() {
        let t = TimestampedUri::parse(Uri::new(format!("mem://a/__{}_42", UUID))).unwrap();
        assert_eq!(t.timestamp_range, (42, 42));
        let t = TimestampedUri::parse(Uri::new(format!("mem://a/__{}_42_50", UUID))).unwrap();
        assert_eq!(t.timestamp_range, (42, 50));
        let t = TimestampedUri::parse(Uri::new("mem://a/__array_schema.tdb")).unwrap();
        assert_eq!(t.timestamp_range, (0, 0));
    }

    #[test]
    fn test_reject_malformed() {
        for bad in ["mem://a/__1_2_nothex", "mem://a/frag", "mem://a/__1_2_ABCDEF0123456789abcdef0123456789"] {
            assert!(matches!(
                TimestampedUri::parse(Uri::new(bad)),
                Err(StorageError::InvalidUri(_))
            ));
        }
    }

    #[test]
    fn test_generated_uuids_are_unique_hex() {
        let a = generate_uuid();
        let b = generate_uuid();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, b);
        let name = fragment_name(1, 2, &a);
        let t = TimestampedUri::parse(Uri::new(format!("x://y/{}", name))).unwrap();
        assert_eq!(t.uuid, a);
    }

    #[test]
    fn test_window_predicates() {
        let t = TimestampedUri::parse(Uri::new(format!("m://a/__10_20_{}", UUID))).unwrap();
        assert!(t.intersects(15, 30));
        assert!(!t.intersects(21, 30));
        assert!(t.contained_in(10, 20));
        assert!(!t.contained_in(11, 20));
    }
}
