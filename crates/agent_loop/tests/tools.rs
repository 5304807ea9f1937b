use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use agent_loop::policy::PermissionPolicy;
use agent_loop::tools::{ToolCall, ToolExecutor, ToolSandbox};
use serde_json::json;
use tempfile::tempdir;

fn new_sandbox(working_dir: &Path, policy: PermissionPolicy) -> ToolSandbox {
    ToolSandbox::new(working_dir, policy).expect("working dir should be valid")
}

fn bash(command: &str) -> ToolCall {
    ToolCall::BashCommand {
        command: command.to_string(),
        reason: "test".to_string(),
    }
}

#[test]
fn all_tools_have_success_paths_under_full_permissions() {
    let workspace = tempdir().expect("temp workspace");
    let mut sandbox = new_sandbox(workspace.path(), PermissionPolicy::ALL);

    let write_result = sandbox.execute(ToolCall::WriteFile {
        path: "notes/hello.txt".to_string(),
        content: "hello\n".to_string(),
    });
    assert!(write_result.ok, "write_file should succeed: {}", write_result.content);
    assert!(!write_result.dry_run);
    assert_eq!(write_result.content, "Wrote 6 bytes to notes/hello.txt");
    assert_eq!(
        fs::read_to_string(workspace.path().join("notes/hello.txt")).expect("written file"),
        "hello\n"
    );

    let read_result = sandbox.execute(ToolCall::ReadFile {
        path: "notes/hello.txt".to_string(),
    });
    assert!(read_result.ok, "read_file should succeed: {}", read_result.content);
    assert_eq!(read_result.content, "hello\n");

    let bash_result = sandbox.execute(bash("cat notes/hello.txt | wc -l"));
    assert!(bash_result.ok, "bash should succeed: {}", bash_result.content);
    assert!(bash_result.content.starts_with("status: exit_code=0"), "{}", bash_result.content);
    assert!(bash_result.content.contains("1"), "{}", bash_result.content);
}

#[test]
fn overwrite_reports_a_unified_diff() {
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("a.txt"), "one\ntwo\n").expect("seed file");
    let mut sandbox = new_sandbox(workspace.path(), PermissionPolicy::WRITE);

    let result = sandbox.execute(ToolCall::WriteFile {
        path: "a.txt".to_string(),
        content: "one\nthree\n".to_string(),
    });

    assert!(result.ok, "{}", result.content);
    let diff = result.diff.expect("diff for overwrite");
    assert!(diff.contains("-two"), "{diff}");
    assert!(diff.contains("+three"), "{diff}");
}

#[test]
fn bash_reports_non_zero_exit_as_failure() {
    let workspace = tempdir().expect("temp workspace");
    let mut sandbox = new_sandbox(workspace.path(), PermissionPolicy::EXECUTE);

    let result = sandbox.execute(bash("ls does-not-exist"));

    assert!(!result.ok);
    assert!(result.content.contains("exit_code=2"), "{}", result.content);
    assert!(result.content.contains("does-not-exist"), "{}", result.content);
}

#[test]
fn read_file_rejects_path_escape_outside_working_dir() {
    let outer = tempdir().expect("outer temp dir");
    let working_dir = outer.path().join("project");
    fs::create_dir_all(&working_dir).expect("create working dir");
    fs::write(outer.path().join("outside.txt"), "outside").expect("write outside file");

    let mut sandbox = new_sandbox(&working_dir, PermissionPolicy::ALL);
    let result = sandbox.execute(ToolCall::ReadFile {
        path: "../outside.txt".to_string(),
    });

    assert!(!result.ok);
    assert!(
        result.content.contains("path escapes working directory"),
        "{}",
        result.content
    );
}

#[test]
fn sibling_directory_sharing_a_prefix_is_not_contained() {
    let outer = tempdir().expect("outer temp dir");
    let working_dir = outer.path().join("project");
    let sibling = outer.path().join("project-evil");
    fs::create_dir_all(&working_dir).expect("create working dir");
    fs::create_dir_all(&sibling).expect("create sibling");
    fs::write(sibling.join("secret.txt"), "secret").expect("seed sibling");

    let mut sandbox = new_sandbox(&working_dir, PermissionPolicy::ALL);
    let result = sandbox.execute(ToolCall::ReadFile {
        path: sibling.join("secret.txt").display().to_string(),
    });

    assert!(!result.ok);
    assert!(result.content.contains("path escapes"), "{}", result.content);
}

#[test]
fn write_file_rejects_path_escape_outside_working_dir() {
    let outer = tempdir().expect("outer temp dir");
    let working_dir = outer.path().join("project");
    fs::create_dir_all(&working_dir).expect("create working dir");
    let mut sandbox = new_sandbox(&working_dir, PermissionPolicy::ALL);

    let result = sandbox.execute(ToolCall::WriteFile {
        path: "../escape.txt".to_string(),
        content: "forbidden".to_string(),
    });

    assert!(!result.ok);
    assert!(result.content.contains("path escapes"), "{}", result.content);
    assert!(!outer.path().join("escape.txt").exists());
}

#[cfg(unix)]
#[test]
fn symlinks_pointing_outside_are_rejected() {
    let outer = tempdir().expect("outer temp dir");
    let working_dir = outer.path().join("project");
    let outside_dir = outer.path().join("outside");
    fs::create_dir_all(&working_dir).expect("create working dir");
    fs::create_dir_all(&outside_dir).expect("create outside dir");
    fs::write(outside_dir.join("secret.txt"), "secret").expect("seed outside file");
    std::os::unix::fs::symlink(&outside_dir, working_dir.join("link")).expect("symlink");

    let mut sandbox = new_sandbox(&working_dir, PermissionPolicy::ALL);

    let read = sandbox.execute(ToolCall::ReadFile {
        path: "link/secret.txt".to_string(),
    });
    assert!(!read.ok);
    assert!(read.content.contains("path escapes"), "{}", read.content);

    let write = sandbox.execute(ToolCall::WriteFile {
        path: "link/new.txt".to_string(),
        content: "x".to_string(),
    });
    assert!(!write.ok);
    assert!(write.content.contains("path escapes"), "{}", write.content);
    assert!(!outside_dir.join("new.txt").exists());
}

#[test]
fn read_policy_turns_writes_and_commands_into_dry_runs() {
    let workspace = tempdir().expect("temp workspace");
    let mut sandbox = new_sandbox(workspace.path(), PermissionPolicy::READ);

    let write = sandbox.execute(ToolCall::WriteFile {
        path: "test.txt".to_string(),
        content: "hello".to_string(),
    });
    assert!(write.ok);
    assert!(write.dry_run);
    assert!(write.content.starts_with("Dry run:"), "{}", write.content);
    assert!(write.content.contains("create test.txt"), "{}", write.content);
    assert!(!workspace.path().join("test.txt").exists());

    let command = sandbox.execute(bash("echo hi"));
    assert!(command.ok);
    assert!(command.dry_run);
    assert!(command.content.contains("`echo hi`"), "{}", command.content);
}

#[test]
fn validator_rejections_apply_under_every_policy() {
    let workspace = tempdir().expect("temp workspace");

    for policy in [PermissionPolicy::READ, PermissionPolicy::ALL] {
        let mut sandbox = new_sandbox(workspace.path(), policy);
        let result = sandbox.execute(bash("ls && whoami"));

        assert!(!result.ok, "{policy}");
        assert!(!result.dry_run, "{policy}");
        assert!(
            result.content.contains("blocked pattern '&&'"),
            "{}",
            result.content
        );
    }
}

#[test]
fn malformed_tool_use_becomes_an_error_output() {
    let workspace = tempdir().expect("temp workspace");
    let mut sandbox = new_sandbox(workspace.path(), PermissionPolicy::ALL);

    let result = sandbox.execute_tool_use("bash_command", &json!({"command": "ls"}));

    assert!(!result.ok);
    assert!(result.content.contains("'reason'"), "{}", result.content);
}

#[cfg(unix)]
#[test]
fn timed_out_command_is_killed_with_its_pipeline() {
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("log.txt"), "line\n").expect("seed file");
    let mut sandbox = new_sandbox(workspace.path(), PermissionPolicy::EXECUTE)
        .with_bash_timeout(Duration::from_millis(300));

    let started = Instant::now();
    let result = sandbox.execute(bash("tail -f log.txt | cat"));

    assert!(!result.ok);
    assert!(result.content.contains("timed out"), "{}", result.content);
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "timeout should return promptly"
    );
}

#[test]
fn large_command_output_is_truncated() {
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("big.txt"), "x".repeat(4096)).expect("seed file");
    let mut sandbox = new_sandbox(workspace.path(), PermissionPolicy::EXECUTE)
        .with_bash_max_output_bytes(256);

    let result = sandbox.execute(bash("cat big.txt"));

    assert!(result.ok, "{}", result.content);
    assert!(result.content.ends_with("[truncated]"), "{}", result.content);
    assert!(result.content.len() <= 256 + "\n[truncated]".len());
}

#[test]
fn oversized_reads_are_refused() {
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("big.txt"), "x".repeat(64)).expect("seed file");
    let mut sandbox =
        new_sandbox(workspace.path(), PermissionPolicy::READ).with_read_max_bytes(16);

    let result = sandbox.execute(ToolCall::ReadFile {
        path: "big.txt".to_string(),
    });

    assert!(!result.ok);
    assert!(result.content.contains("max read size"), "{}", result.content);
}

#[test]
fn protected_directory_is_off_limits_to_file_tools() {
    let workspace = tempdir().expect("temp workspace");
    let store_dir = workspace.path().join(".agent_loop");
    fs::create_dir_all(&store_dir).expect("create store dir");
    fs::write(store_dir.join("config.json"), "{}").expect("seed config");
    let mut sandbox =
        new_sandbox(workspace.path(), PermissionPolicy::ALL).with_protected_path(".agent_loop");

    let overwrite = sandbox.execute(ToolCall::WriteFile {
        path: ".agent_loop/config.json".to_string(),
        content: "[]".to_string(),
    });
    assert!(!overwrite.ok);
    assert!(overwrite.content.contains("reserved"), "{}", overwrite.content);
    assert_eq!(
        fs::read_to_string(store_dir.join("config.json")).expect("config"),
        "{}"
    );

    let create = sandbox.execute(ToolCall::WriteFile {
        path: "./sub/../.agent_loop/response_x.json".to_string(),
        content: "[]".to_string(),
    });
    assert!(!create.ok);
    assert!(!store_dir.join("response_x.json").exists());

    let read = sandbox.execute(ToolCall::ReadFile {
        path: ".agent_loop/config.json".to_string(),
    });
    assert!(!read.ok);
    assert!(read.content.contains("reserved"), "{}", read.content);

    let sibling = sandbox.execute(ToolCall::WriteFile {
        path: ".agent_loop_notes.txt".to_string(),
        content: "fine".to_string(),
    });
    assert!(sibling.ok, "{}", sibling.content);
}

#[cfg(unix)]
#[test]
fn symlink_into_protected_directory_is_rejected() {
    let workspace = tempdir().expect("temp workspace");
    let store_dir = workspace.path().join(".agent_loop");
    fs::create_dir_all(&store_dir).expect("create store dir");
    fs::write(store_dir.join("config.json"), "{}").expect("seed config");
    std::os::unix::fs::symlink(&store_dir, workspace.path().join("state")).expect("symlink");
    let mut sandbox =
        new_sandbox(workspace.path(), PermissionPolicy::ALL).with_protected_path(&store_dir);

    let write = sandbox.execute(ToolCall::WriteFile {
        path: "state/config.json".to_string(),
        content: "[]".to_string(),
    });

    assert!(!write.ok);
    assert!(write.content.contains("reserved"), "{}", write.content);
    assert_eq!(
        fs::read_to_string(store_dir.join("config.json")).expect("config"),
        "{}"
    );
}

#[test]
fn find_and_sort_cannot_modify_the_working_dir() {
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("seed.txt"), "b\na\n").expect("seed file");
    let mut sandbox = new_sandbox(workspace.path(), PermissionPolicy::EXECUTE);

    for command in [
        "find . -maxdepth 1 -exec touch created {} +",
        "find . -name seed.txt -delete",
        "sort -o created seed.txt",
        "git diff --output=created",
    ] {
        let result = sandbox.execute(bash(command));
        assert!(!result.ok, "{command} should be rejected");
        assert!(result.content.contains("is not allowed"), "{}", result.content);
    }

    assert!(workspace.path().join("seed.txt").exists());
    assert!(!workspace.path().join("created").exists());
}
