use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};

use crate::error::ConversationStoreError;
use crate::paths::AUDIT_LOG_FILE;
use crate::schema::AuditLogEntry;
use crate::store::ConversationStore;

impl ConversationStore {
    /// Appends one entry as a JSON line and syncs it to disk before returning.
    pub fn append_audit_log(&self, entry: &AuditLogEntry) -> Result<(), ConversationStoreError> {
        let path = self.dir.join(AUDIT_LOG_FILE);
        let mut line = serde_json::to_string(entry)
            .map_err(|source| ConversationStoreError::json_serialize(&path, source))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| ConversationStoreError::io("opening audit log", &path, source))?;
        file.write_all(line.as_bytes())
            .map_err(|source| ConversationStoreError::io("appending audit log", &path, source))?;
        file.sync_data()
            .map_err(|source| ConversationStoreError::io("syncing audit log", &path, source))
    }

    /// Reads every audit entry in append order. A missing log is empty.
    pub fn read_audit_log(&self) -> Result<Vec<AuditLogEntry>, ConversationStoreError> {
        let path = self.dir.join(AUDIT_LOG_FILE);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ConversationStoreError::io("opening audit log", &path, source))
            }
        };

        let mut entries = Vec::new();
        for (line_index, line_result) in BufReader::new(file).lines().enumerate() {
            let line_number = line_index + 1;
            let line = line_result
                .map_err(|source| ConversationStoreError::io("reading audit log", &path, source))?;
            if line.trim().is_empty() {
                continue;
            }

            let entry = serde_json::from_str(&line)
                .map_err(|source| ConversationStoreError::json_line(&path, line_number, source))?;
            entries.push(entry);
        }

        Ok(entries)
    }
}
