//! Source folder identifiers, accepted as raw IDs or Drive folder URLs.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::Error;

static FOLDER_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://drive\.google\.com/(?:drive/(?:u/\d+/)?folders/|open\?id=)([a-zA-Z0-9_-]+)")
        .expect("Invalid folder URL regex")
});

static ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("Invalid ID regex"));

/// ID of the Drive folder the job reads from.
///
/// ```
/// use drive_stage::FolderId;
///
/// let id: FolderId = "https://drive.google.com/drive/u/0/folders/1abc123".parse().unwrap();
/// assert_eq!(id.as_str(), "1abc123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderId(String);

impl FolderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for FolderId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();

        if let Some(id) = FOLDER_URL_REGEX.captures(trimmed).and_then(|c| c.get(1)) {
            return Ok(Self(id.as_str().to_string()));
        }

        if ID_REGEX.is_match(trimmed) {
            return Ok(Self(trimmed.to_string()));
        }

        Err(Error::InvalidFolderId(s.to_string()))
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
