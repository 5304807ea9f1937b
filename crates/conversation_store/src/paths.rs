use std::path::{Path, PathBuf};

use crate::turn_id::TurnId;

pub const REQUEST_PREFIX: &str = "request_";
pub const RESPONSE_PREFIX: &str = "response_";
pub const ARTIFACT_EXTENSION: &str = ".json";
pub const DELETING_SUFFIX: &str = ".deleting";
pub const TEMP_SUFFIX: &str = ".tmp";

pub const CONFIG_FILE: &str = "config.json";
pub const AUDIT_LOG_FILE: &str = "tool_log.jsonl";
pub const MODEL_CACHE_FILE: &str = "models.json";

/// Which half of a turn an artifact file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Request,
    Response,
}

impl ArtifactKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Request => REQUEST_PREFIX,
            Self::Response => RESPONSE_PREFIX,
        }
    }
}

#[must_use]
pub fn artifact_file_name(kind: ArtifactKind, turn_id: &TurnId) -> String {
    format!("{}{}{}", kind.prefix(), turn_id, ARTIFACT_EXTENSION)
}

#[must_use]
pub fn request_file_name(turn_id: &TurnId) -> String {
    artifact_file_name(ArtifactKind::Request, turn_id)
}

#[must_use]
pub fn response_file_name(turn_id: &TurnId) -> String {
    artifact_file_name(ArtifactKind::Response, turn_id)
}

/// Parses `request_<id>.json` / `response_<id>.json`.
///
/// Sentinel, temp, and foreign files yield `None`.
#[must_use]
pub fn parse_artifact_file_name(file_name: &str) -> Option<(ArtifactKind, TurnId)> {
    let stem = file_name.strip_suffix(ARTIFACT_EXTENSION)?;
    let (kind, raw_id) = if let Some(raw_id) = stem.strip_prefix(REQUEST_PREFIX) {
        (ArtifactKind::Request, raw_id)
    } else if let Some(raw_id) = stem.strip_prefix(RESPONSE_PREFIX) {
        (ArtifactKind::Response, raw_id)
    } else {
        return None;
    };

    TurnId::parse(raw_id).ok().map(|turn_id| (kind, turn_id))
}

#[must_use]
pub fn deleting_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(DELETING_SUFFIX);
    PathBuf::from(name)
}

#[must_use]
pub fn is_deleting_sentinel(file_name: &str) -> bool {
    file_name.ends_with(DELETING_SUFFIX)
}

/// Temp files are dot-prefixed so they never match an artifact name.
#[must_use]
pub fn temp_path_for(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_name = format!(".{file_name}.{}{TEMP_SUFFIX}", uuid::Uuid::new_v4().simple());
    target.with_file_name(temp_name)
}

#[must_use]
pub fn is_temp_file(file_name: &str) -> bool {
    file_name.starts_with('.') && file_name.ends_with(TEMP_SUFFIX)
}
