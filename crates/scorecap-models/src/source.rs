//! Capture source descriptors.

use serde::{Deserialize, Serialize};

/// The kind of source a job captures from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A video file already on local disk.
    File,
    /// A streaming URL resolved through the external downloader.
    Youtube,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::File => "file",
            SourceKind::Youtube => "youtube",
        }
    }
}

/// A validated capture source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub source_type: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub youtube_url: Option<String>,
}

impl Source {
    pub fn local_file(path: impl Into<String>) -> Self {
        Self {
            source_type: SourceKind::File,
            file_path: Some(path.into()),
            youtube_url: None,
        }
    }

    pub fn stream_url(url: impl Into<String>) -> Self {
        Self {
            source_type: SourceKind::Youtube,
            file_path: None,
            youtube_url: Some(url.into()),
        }
    }

    /// The locator string for this source's kind, if present.
    pub fn locator(&self) -> Option<&str> {
        match self.source_type {
            SourceKind::File => self.file_path.as_deref(),
            SourceKind::Youtube => self.youtube_url.as_deref(),
        }
    }

    /// Check the kind-specific required field is present and non-empty.
    pub fn validate(&self) -> Result<(), String> {
        match self.source_type {
            SourceKind::File => match self.file_path.as_deref() {
                Some(p) if !p.trim().is_empty() => Ok(()),
                _ => Err("file_path is required when source_type is file".to_string()),
            },
            SourceKind::Youtube => match self.youtube_url.as_deref() {
                Some(u) if !u.trim().is_empty() => Ok(()),
                _ => Err("youtube_url is required when source_type is youtube".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_locator() {
        assert!(Source::local_file("/tmp/in.mp4").validate().is_ok());
        assert!(Source::stream_url("https://youtu.be/abc").validate().is_ok());

        let missing = Source {
            source_type: SourceKind::Youtube,
            file_path: None,
            youtube_url: None,
        };
        assert!(missing.validate().is_err());
    }

    #[test]
    fn test_serde_wire_names() {
        let src = Source::stream_url("https://youtu.be/abc");
        let json = serde_json::to_string(&src).unwrap();
        assert!(json.contains("\"source_type\":\"youtube\""));
        assert!(!json.contains("file_path"));
    }
}
