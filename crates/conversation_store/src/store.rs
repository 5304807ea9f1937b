use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use agent_provider::{GenerateResponse, Message};
use serde::de::DeserializeOwned;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::ConversationStoreError;
use crate::paths::{
    is_deleting_sentinel, is_temp_file, parse_artifact_file_name,
    request_file_name, response_file_name, ArtifactKind, CONFIG_FILE, DELETING_SUFFIX,
    MODEL_CACHE_FILE,
};
use crate::schema::{Config, ModelCache, RequestRecord, ResponseRecord};
use crate::turn_id::TurnId;

/// Durable per-directory store of turn artifacts.
///
/// One process drives one directory at a time. Every write lands through a
/// temp file and a rename, so readers only ever see complete files.
#[derive(Debug)]
pub struct ConversationStore {
    pub(crate) dir: PathBuf,
}

#[derive(Debug, Default)]
struct ArtifactScan {
    requests: BTreeSet<TurnId>,
    responses: BTreeSet<TurnId>,
}

impl ConversationStore {
    /// Opens (creating if needed) a conversation directory and finishes any
    /// prune a previous process left behind.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ConversationStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| {
            ConversationStoreError::io("creating conversation directory", &dir, source)
        })?;

        let store = Self { dir };
        let swept = store.sweep_interrupted_writes()?;
        if swept > 0 {
            warn!(dir = %store.dir.display(), swept, "removed leftovers from an interrupted run");
        }

        Ok(store)
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn request_path(&self, turn_id: &TurnId) -> PathBuf {
        self.dir.join(request_file_name(turn_id))
    }

    #[must_use]
    pub fn response_path(&self, turn_id: &TurnId) -> PathBuf {
        self.dir.join(response_file_name(turn_id))
    }

    /// Removes `*.deleting` sentinels and stale temp files.
    ///
    /// A request sentinel whose response is still live means a prune crashed
    /// between the two renames; the response is removed as well so the
    /// interrupted deletion completes instead of leaving a stray half.
    pub fn sweep_interrupted_writes(&self) -> Result<usize, ConversationStoreError> {
        let mut swept = 0usize;

        for file_name in self.file_names()? {
            if is_deleting_sentinel(&file_name) {
                let live_name = file_name.trim_end_matches(DELETING_SUFFIX);
                if let Some((ArtifactKind::Request, turn_id)) = parse_artifact_file_name(live_name)
                {
                    let response = self.response_path(&turn_id);
                    if response.exists() {
                        warn!(turn_id = %turn_id, "completing interrupted prune of turn");
                        remove_file_if_present(&response)?;
                        swept += 1;
                    }
                }

                remove_file_if_present(&self.dir.join(&file_name))?;
                swept += 1;
            } else if is_temp_file(&file_name) {
                remove_file_if_present(&self.dir.join(&file_name))?;
                swept += 1;
            }
        }

        Ok(swept)
    }

    /// Allocates an id strictly newer than every turn already on disk.
    pub fn next_turn_id(&self) -> Result<TurnId, ConversationStoreError> {
        let candidate = TurnId::now()?;
        let scan = self.scan_artifacts()?;
        let newest = scan.requests.iter().chain(scan.responses.iter()).max();

        match newest {
            Some(newest) if *newest >= candidate => newest.successor(),
            _ => Ok(candidate),
        }
    }

    pub fn save_request(
        &self,
        turn_id: &TurnId,
        messages: &[Message],
    ) -> Result<PathBuf, ConversationStoreError> {
        let record = RequestRecord {
            timestamp: turn_id
                .datetime()?
                .format(&Rfc3339)
                .map_err(ConversationStoreError::ClockFormat)?,
            messages: messages.to_vec(),
        };
        let path = self.request_path(turn_id);
        self.write_json_atomic(&path, &record)?;
        debug!(turn_id = %turn_id, messages = messages.len(), "saved request");
        Ok(path)
    }

    pub fn save_response(
        &self,
        turn_id: &TurnId,
        responses: &[GenerateResponse],
    ) -> Result<PathBuf, ConversationStoreError> {
        let path = self.response_path(turn_id);
        if responses.is_empty() {
            return Err(ConversationStoreError::EmptyArtifact { path });
        }

        self.write_json_atomic(&path, &responses)?;
        debug!(turn_id = %turn_id, iterations = responses.len(), "saved response");
        Ok(path)
    }

    pub fn load_request(&self, turn_id: &TurnId) -> Result<RequestRecord, ConversationStoreError> {
        let path = self.request_path(turn_id);
        if !path.exists() {
            return Err(ConversationStoreError::RequestNotFound {
                turn_id: turn_id.to_string(),
            });
        }
        read_json(&path)
    }

    pub fn load_response(
        &self,
        turn_id: &TurnId,
    ) -> Result<ResponseRecord, ConversationStoreError> {
        read_json(&self.response_path(turn_id))
    }

    /// Returns ids with both a request and a response, oldest first.
    pub fn list_complete_pairs(&self) -> Result<Vec<TurnId>, ConversationStoreError> {
        let scan = self.scan_artifacts()?;
        Ok(scan
            .requests
            .intersection(&scan.responses)
            .cloned()
            .collect())
    }

    /// Returns requests that never received a response, oldest first.
    pub fn orphan_requests(&self) -> Result<Vec<TurnId>, ConversationStoreError> {
        let scan = self.scan_artifacts()?;
        Ok(scan
            .requests
            .difference(&scan.responses)
            .cloned()
            .collect())
    }

    /// Returns the newest orphaned request that is newer than every complete
    /// pair, i.e. the turn an interrupted run was working on.
    pub fn latest_resumable_request(&self) -> Result<Option<TurnId>, ConversationStoreError> {
        let newest_complete = self.list_complete_pairs()?.pop();
        let newest_orphan = self.orphan_requests()?.pop();

        Ok(match (newest_orphan, newest_complete) {
            (Some(orphan), Some(complete)) if orphan <= complete => None,
            (orphan, _) => orphan,
        })
    }

    /// Deletes an orphaned request file.
    pub fn discard_request(&self, turn_id: &TurnId) -> Result<(), ConversationStoreError> {
        let path = self.request_path(turn_id);
        fs::remove_file(&path)
            .map_err(|source| ConversationStoreError::io("discarding request", &path, source))
    }

    /// Rebuilds conversational context from complete turns.
    ///
    /// Each turn contributes its user message and the content of its final
    /// provider response; intermediate tool iterations stay on disk only.
    pub fn load_history(&self) -> Result<Vec<Message>, ConversationStoreError> {
        let mut history = Vec::new();

        for turn_id in self.list_complete_pairs()? {
            let request_path = self.request_path(&turn_id);
            let request: RequestRecord = read_json(&request_path)?;
            let user = request
                .messages
                .last()
                .cloned()
                .ok_or(ConversationStoreError::EmptyArtifact { path: request_path })?;

            let response_path = self.response_path(&turn_id);
            let responses: ResponseRecord = read_json(&response_path)?;
            let last = responses
                .into_iter()
                .last()
                .ok_or(ConversationStoreError::EmptyArtifact {
                    path: response_path,
                })?;

            history.push(user);
            history.push(last.into_message());
        }

        Ok(history)
    }

    pub fn load_config(&self) -> Result<Config, ConversationStoreError> {
        read_json_or_default(&self.dir.join(CONFIG_FILE))
    }

    pub fn save_config(&self, config: &Config) -> Result<(), ConversationStoreError> {
        self.write_json_atomic(&self.dir.join(CONFIG_FILE), config)
    }

    pub fn load_model_cache(&self) -> Result<Option<ModelCache>, ConversationStoreError> {
        let path = self.dir.join(MODEL_CACHE_FILE);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    pub fn save_model_cache(&self, cache: &ModelCache) -> Result<(), ConversationStoreError> {
        self.write_json_atomic(&self.dir.join(MODEL_CACHE_FILE), cache)
    }

    fn scan_artifacts(&self) -> Result<ArtifactScan, ConversationStoreError> {
        let mut scan = ArtifactScan::default();
        for file_name in self.file_names()? {
            match parse_artifact_file_name(&file_name) {
                Some((ArtifactKind::Request, turn_id)) => {
                    scan.requests.insert(turn_id);
                }
                Some((ArtifactKind::Response, turn_id)) => {
                    scan.responses.insert(turn_id);
                }
                None => {}
            }
        }
        Ok(scan)
    }

    fn file_names(&self) -> Result<Vec<String>, ConversationStoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| {
            ConversationStoreError::io("listing conversation directory", &self.dir, source)
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| {
                ConversationStoreError::io("listing conversation directory", &self.dir, source)
            })?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<(), ConversationStoreError> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|source| ConversationStoreError::json_serialize(path, source))?;
        let temp = crate::paths::temp_path_for(path);

        let written = write_synced(&temp, &bytes).and_then(|()| {
            fs::rename(&temp, path)
                .map_err(|source| ConversationStoreError::io("renaming temp file", path, source))
        });
        if written.is_err() {
            let _ = fs::remove_file(&temp);
        }
        written?;

        sync_dir(&self.dir);
        Ok(())
    }
}

/// Current UTC time in RFC3339, the timestamp format of every stored record.
pub fn now_rfc3339() -> Result<String, ConversationStoreError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(ConversationStoreError::ClockFormat)
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), ConversationStoreError> {
    let mut file = File::create(path)
        .map_err(|source| ConversationStoreError::io("creating temp file", path, source))?;
    file.write_all(bytes)
        .map_err(|source| ConversationStoreError::io("writing temp file", path, source))?;
    file.sync_all()
        .map_err(|source| ConversationStoreError::io("syncing temp file", path, source))
}

// Directory fsync makes the rename itself durable; not every platform allows
// opening a directory, so failure here is ignored.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

fn remove_file_if_present(path: &Path) -> Result<(), ConversationStoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ConversationStoreError::io(
            "removing leftover file",
            path,
            source,
        )),
    }
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConversationStoreError> {
    let bytes =
        fs::read(path).map_err(|source| ConversationStoreError::io("reading", path, source))?;
    serde_json::from_slice(&bytes).map_err(|source| ConversationStoreError::json(path, source))
}

fn read_json_or_default<T: DeserializeOwned + Default>(
    path: &Path,
) -> Result<T, ConversationStoreError> {
    match fs::read(path) {
        Ok(bytes) => {
            serde_json::from_slice(&bytes).map_err(|source| ConversationStoreError::json(path, source))
        }
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(source) => Err(ConversationStoreError::io("reading", path, source)),
    }
}

#[cfg(test)]
mod tests {
    use agent_provider::{ContentBlock, StopReason, Usage};

    use super::*;

    fn response(text: &str) -> GenerateResponse {
        GenerateResponse {
            content: vec![ContentBlock::text(text)],
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        }
    }

    #[test]
    fn next_turn_id_stays_ahead_of_future_dated_artifacts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConversationStore::open(dir.path()).expect("open");
        let future = TurnId::parse("29990101T000000.000000000Z").expect("turn id");
        store
            .save_request(&future, &[Message::user_text("from the future")])
            .expect("save request");

        let next = store.next_turn_id().expect("next id");

        assert_eq!(next.as_str(), "29990101T000000.000000001Z");
    }

    #[test]
    fn failed_atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConversationStore::open(dir.path()).expect("open");
        let target = dir.path().join("occupied");
        fs::create_dir_all(target.join("child")).expect("occupy target with a directory");

        let error = store
            .write_json_atomic(&target, &vec![response("x")])
            .expect_err("renaming onto a non-empty directory must fail");

        assert!(matches!(error, ConversationStoreError::Io { .. }), "{error}");
        let leftovers: Vec<_> = store
            .file_names()
            .expect("list")
            .into_iter()
            .filter(|name| is_temp_file(name))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn save_response_rejects_empty_buffer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConversationStore::open(dir.path()).expect("open");
        let turn_id = store.next_turn_id().expect("id");

        let error = store.save_response(&turn_id, &[]).expect_err("empty buffer");
        assert!(matches!(error, ConversationStoreError::EmptyArtifact { .. }));
        assert!(!store.response_path(&turn_id).exists());
    }
}
