//! Slash-separated object URIs.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const FILE_SCHEME: &str = "file://";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Uri(String);

impl Uri {
    /// Trailing slashes are dropped so `a/` and `a` name the same object.
    pub fn new(s: impl Into<String>) -> Self {
        let mut s = s.into();
        while s.len() > 1 && s.ends_with('/') && !s.ends_with("://") {
            s.pop();
        }
        Uri(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn join_path(&self, part: &str) -> Uri {
        Uri::new(format!("{}/{}", self.0, part.trim_start_matches('/')))
    }

    pub fn last_path_part(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn parent(&self) -> Option<Uri> {
        let idx = self.0.rfind('/')?;
        if idx == 0 {
            return Some(Uri::new("/"));
        }
        let parent = &self.0[..idx];
        if parent.ends_with(':') || parent.ends_with(":/") {
            return None;
        }
        Some(Uri::new(parent))
    }

    /// Local filesystem path, with any `file://` scheme stripped.
    pub fn to_path(&self) -> PathBuf {
        PathBuf::from(self.0.strip_prefix(FILE_SCHEME).unwrap_or(&self.0))
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Uri {
    fn from(s: &str) -> Self {
        Uri::new(s)
    }
}

impl From<String> for Uri {
    fn from(s: String) -> Self {
        Uri::new(s)
    }
}

impl From<&std::path::Path> for Uri {
    fn from(p: &std::path::Path) -> Self {
        Uri::new(p.to_string_lossy().replace('\\', "/"))
    }
}
