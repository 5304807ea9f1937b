use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{ConversationStoreError, PruneFailure};
use crate::paths::deleting_path;
use crate::store::ConversationStore;

/// Outcome of a prune that completed without per-file failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub pruned: usize,
    pub kept: usize,
}

impl ConversationStore {
    /// Deletes all but the newest `keep_last` complete pairs.
    ///
    /// Phase one renames both files of every doomed pair to `.deleting`
    /// sentinels, rolling back the request rename when the response rename
    /// fails. Phase two removes the sentinels. Per-file failures do not stop
    /// the remaining work; they are reported together afterwards.
    pub fn prune(&self, keep_last: usize) -> Result<PruneReport, ConversationStoreError> {
        let pairs = self.list_complete_pairs()?;
        if pairs.len() <= keep_last {
            return Ok(PruneReport {
                pruned: 0,
                kept: pairs.len(),
            });
        }

        let doomed_count = pairs.len() - keep_last;
        let mut failures = Vec::new();
        let mut staged = Vec::new();

        for turn_id in &pairs[..doomed_count] {
            let request = self.request_path(turn_id);
            let response = self.response_path(turn_id);
            match stage_pair_for_deletion(&request, &response) {
                Ok(sentinels) => staged.push(sentinels),
                Err(failure) => {
                    warn!(turn_id = %turn_id, %failure, "could not stage turn for deletion");
                    failures.push(failure);
                }
            }
        }

        let pruned = staged.len();
        for sentinel in staged.iter().flatten() {
            if let Err(source) = fs::remove_file(sentinel) {
                failures.push(PruneFailure {
                    path: sentinel.clone(),
                    operation: "removing sentinel",
                    message: source.to_string(),
                });
            }
        }

        if failures.is_empty() {
            info!(pruned, kept = keep_last, "pruned conversation history");
            Ok(PruneReport {
                pruned,
                kept: keep_last,
            })
        } else {
            Err(ConversationStoreError::PruneIncomplete { pruned, failures })
        }
    }
}

/// Renames a request/response pair to sentinels, never leaving it half-renamed.
pub(crate) fn stage_pair_for_deletion(
    request: &Path,
    response: &Path,
) -> Result<[PathBuf; 2], PruneFailure> {
    let request_sentinel = deleting_path(request);
    let response_sentinel = deleting_path(response);

    fs::rename(request, &request_sentinel).map_err(|source| PruneFailure {
        path: request.to_path_buf(),
        operation: "staging request",
        message: source.to_string(),
    })?;

    if let Err(source) = fs::rename(response, &response_sentinel) {
        let rollback = fs::rename(&request_sentinel, request);
        debug!(request = %request.display(), rolled_back = rollback.is_ok(), "response staging failed");

        let message = match rollback {
            Ok(()) => format!("{source}; request restored"),
            Err(rollback_error) => {
                format!("{source}; request rollback failed: {rollback_error}")
            }
        };
        return Err(PruneFailure {
            path: response.to_path_buf(),
            operation: "staging response",
            message,
        });
    }

    Ok([request_sentinel, response_sentinel])
}
