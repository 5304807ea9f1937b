use std::fs;
use std::path::Path;

use agent_provider::{ContentBlock, GenerateResponse, Message, Role, StopReason, Usage};
use assert_matches::assert_matches;
use conversation_store::{
    AuditLogEntry, Config, ConversationStore, ConversationStoreError, ModelCache, TurnId,
    DELETING_SUFFIX,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

fn open_store() -> (TempDir, ConversationStore) {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let store = ConversationStore::open(dir.path()).expect("store should open");
    (dir, store)
}

fn turn(n: u32) -> TurnId {
    TurnId::parse(&format!("20260214T0000{n:02}.000000000Z")).expect("valid turn id")
}

fn end_turn(text: &str) -> GenerateResponse {
    GenerateResponse {
        content: vec![ContentBlock::text(text)],
        stop_reason: StopReason::EndTurn,
        usage: Usage {
            input_tokens: 10,
            output_tokens: 5,
        },
    }
}

fn tool_use(id: &str) -> GenerateResponse {
    GenerateResponse {
        content: vec![ContentBlock::tool_use(id, "read_file", json!({"path": "a.txt"}))],
        stop_reason: StopReason::ToolUse,
        usage: Usage::default(),
    }
}

fn save_complete_turn(store: &ConversationStore, turn_id: &TurnId, question: &str, answer: &str) {
    store
        .save_request(turn_id, &[Message::user_text(question)])
        .expect("request should save");
    store
        .save_response(turn_id, &[end_turn(answer)])
        .expect("response should save");
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("read dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn request_and_response_files_use_documented_layout() {
    let (dir, store) = open_store();
    let turn_id = turn(1);

    store
        .save_request(&turn_id, &[Message::user_text("hello")])
        .expect("save request");
    store
        .save_response(&turn_id, &[tool_use("toolu_1"), end_turn("hi")])
        .expect("save response");

    assert_eq!(
        file_names(dir.path()),
        vec![
            "request_20260214T000001.000000000Z.json".to_string(),
            "response_20260214T000001.000000000Z.json".to_string(),
        ]
    );

    let request: serde_json::Value = serde_json::from_slice(
        &fs::read(store.request_path(&turn_id)).expect("read request"),
    )
    .expect("request json");
    assert_eq!(request["timestamp"], "2026-02-14T00:00:01Z");
    assert_eq!(request["messages"][0]["role"], "user");
    assert_eq!(request["messages"][0]["content"][0]["text"], "hello");

    let response: serde_json::Value = serde_json::from_slice(
        &fs::read(store.response_path(&turn_id)).expect("read response"),
    )
    .expect("response json");
    let entries = response.as_array().expect("response is an array");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1]["stop_reason"], "end_turn");
}

#[test]
fn orphaned_requests_are_not_complete_pairs() {
    let (_dir, store) = open_store();
    save_complete_turn(&store, &turn(1), "q1", "a1");
    store
        .save_request(&turn(2), &[Message::user_text("interrupted")])
        .expect("save orphan");

    assert_eq!(store.list_complete_pairs().expect("list"), vec![turn(1)]);
    assert_eq!(store.orphan_requests().expect("orphans"), vec![turn(2)]);
    assert_eq!(
        store.latest_resumable_request().expect("resumable"),
        Some(turn(2))
    );
}

#[test]
fn stale_orphans_older_than_newest_pair_are_not_resumable() {
    let (_dir, store) = open_store();
    store
        .save_request(&turn(1), &[Message::user_text("abandoned")])
        .expect("save orphan");
    save_complete_turn(&store, &turn(2), "q2", "a2");

    assert_eq!(store.latest_resumable_request().expect("resumable"), None);

    store.discard_request(&turn(1)).expect("discard");
    assert!(store.orphan_requests().expect("orphans").is_empty());
}

#[test]
fn complete_pairs_are_sorted_chronologically() {
    let (_dir, store) = open_store();
    for n in [3, 1, 2] {
        save_complete_turn(&store, &turn(n), "q", "a");
    }

    assert_eq!(
        store.list_complete_pairs().expect("list"),
        vec![turn(1), turn(2), turn(3)]
    );
}

#[test]
fn load_history_returns_two_messages_per_turn_oldest_first() {
    let (_dir, store) = open_store();
    save_complete_turn(&store, &turn(1), "first question", "first answer");

    let mut second_request = store.load_history().expect("history after one turn");
    second_request.push(Message::user_text("second question"));
    store
        .save_request(&turn(2), &second_request)
        .expect("save second request");
    store
        .save_response(&turn(2), &[tool_use("toolu_9"), end_turn("second answer")])
        .expect("save second response");

    let history = store.load_history().expect("history");

    assert_eq!(history.len(), 4);
    let roles: Vec<Role> = history.iter().map(|message| message.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
    let texts: Vec<Option<&str>> = history.iter().map(Message::first_text).collect();
    assert_eq!(
        texts,
        vec![
            Some("first question"),
            Some("first answer"),
            Some("second question"),
            Some("second answer"),
        ]
    );
}

#[test]
fn load_history_rejects_empty_response_array() {
    let (_dir, store) = open_store();
    store
        .save_request(&turn(1), &[Message::user_text("q")])
        .expect("save request");
    fs::write(store.response_path(&turn(1)), "[]").expect("write empty response");

    let error = store.load_history().expect_err("empty response must fail");
    assert_matches!(error, ConversationStoreError::EmptyArtifact { .. });
}

#[test]
fn prune_keeps_newest_pairs_and_is_idempotent() {
    let (dir, store) = open_store();
    for n in 1..=5 {
        save_complete_turn(&store, &turn(n), "q", "a");
    }

    let first = store.prune(2).expect("first prune");
    assert_eq!(first.pruned, 3);
    assert_eq!(store.list_complete_pairs().expect("list"), vec![turn(4), turn(5)]);

    let second = store.prune(2).expect("second prune is a no-op");
    assert_eq!(second.pruned, 0);
    assert_eq!(store.list_complete_pairs().expect("list"), vec![turn(4), turn(5)]);
    assert!(file_names(dir.path())
        .iter()
        .all(|name| !name.ends_with(DELETING_SUFFIX)));
}

#[test]
fn prune_leaves_orphaned_requests_alone() {
    let (_dir, store) = open_store();
    save_complete_turn(&store, &turn(1), "q", "a");
    store
        .save_request(&turn(2), &[Message::user_text("orphan")])
        .expect("save orphan");
    save_complete_turn(&store, &turn(3), "q", "a");

    store.prune(1).expect("prune");

    assert_eq!(store.list_complete_pairs().expect("list"), vec![turn(3)]);
    assert_eq!(store.orphan_requests().expect("orphans"), vec![turn(2)]);
}

#[test]
fn reopening_sweeps_sentinels_from_interrupted_prune() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let store = ConversationStore::open(dir.path()).expect("open");
        for n in 1..=3 {
            save_complete_turn(&store, &turn(n), "q", "a");
        }

        // Turn 1 fully staged, turn 2 crashed between the two renames.
        for path in [
            store.request_path(&turn(1)),
            store.response_path(&turn(1)),
            store.request_path(&turn(2)),
        ] {
            let mut sentinel = path.clone().into_os_string();
            sentinel.push(DELETING_SUFFIX);
            fs::rename(&path, sentinel).expect("simulate staged rename");
        }
        fs::write(dir.path().join(".config.json.abc.tmp"), "{").expect("stale temp file");
    }

    let store = ConversationStore::open(dir.path()).expect("reopen");

    assert_eq!(store.list_complete_pairs().expect("list"), vec![turn(3)]);
    assert!(store.orphan_requests().expect("orphans").is_empty());
    assert_eq!(
        file_names(dir.path()),
        vec![
            "request_20260214T000003.000000000Z.json".to_string(),
            "response_20260214T000003.000000000Z.json".to_string(),
        ]
    );
}

#[test]
fn audit_log_appends_one_json_line_per_entry() {
    let (dir, store) = open_store();
    let entry = |tool: &str, success: bool| AuditLogEntry {
        timestamp: "2026-02-14T00:00:00Z".to_string(),
        turn_id: turn(1).to_string(),
        tool: tool.to_string(),
        input: json!({"command": "ls"}),
        result_summary: "ok".to_string(),
        success,
        duration_ms: 3,
        dry_run: !success,
        error: (!success).then(|| "denied".to_string()),
    };

    store.append_audit_log(&entry("bash_command", true)).expect("append");
    store.append_audit_log(&entry("write_file", false)).expect("append");

    let raw = fs::read_to_string(dir.path().join("tool_log.jsonl")).expect("read log");
    assert_eq!(raw.lines().count(), 2);

    let entries = store.read_audit_log().expect("parse log");
    assert_eq!(entries, vec![entry("bash_command", true), entry("write_file", false)]);
}

#[test]
fn audit_log_reports_corrupt_line_number() {
    let (dir, store) = open_store();
    fs::write(dir.path().join("tool_log.jsonl"), "{}\n").expect("write corrupt log");

    let error = store.read_audit_log().expect_err("corrupt line");
    assert_matches!(error, ConversationStoreError::JsonLineParse { line: 1, .. });
}

#[test]
fn config_defaults_when_missing_and_round_trips() {
    let (_dir, store) = open_store();
    assert_eq!(store.load_config().expect("default config"), Config::default());

    let mut config = Config::default();
    config.record_run(
        "claude-sonnet-4-5",
        Usage {
            input_tokens: 1,
            output_tokens: 2,
        },
        0.5,
        "2026-02-14T00:00:00Z",
    );
    store.save_config(&config).expect("save config");

    assert_eq!(store.load_config().expect("load config"), config);
}

#[test]
fn model_cache_is_absent_until_saved() {
    let (_dir, store) = open_store();
    assert_eq!(store.load_model_cache().expect("load"), None);

    let cache = ModelCache {
        last_updated: "2026-02-14T00:00:00Z".to_string(),
        provider: "ollama".to_string(),
        models: vec![agent_provider::ModelInfo::new("llama3.2")],
    };
    store.save_model_cache(&cache).expect("save");

    assert_eq!(store.load_model_cache().expect("load"), Some(cache));
}

#[test]
fn next_turn_id_is_strictly_increasing() {
    let (_dir, store) = open_store();
    let first = store.next_turn_id().expect("first id");
    store
        .save_request(&first, &[Message::user_text("q")])
        .expect("save");

    let second = store.next_turn_id().expect("second id");
    assert!(second > first, "{second} should sort after {first}");
}
