//! Whitelist validation for model-requested shell commands.
//!
//! Checks run in a fixed order and the first failing check wins. Chaining is
//! rejected before anything else so that no later, looser check can be reached
//! through a construct an earlier check would have let through.

use thiserror::Error;

/// Command chaining operators, checked in this order.
pub const CHAINING_OPERATORS: &[&str] = &["&&", "||", ";"];

pub const PATH_TRAVERSAL: &str = "..";

/// Substrings that are never allowed anywhere in a command.
pub const DENYLIST: &[&str] = &[
    "sudo", "rm ", "mv ", "cp ", "chmod", "chown", "curl", "wget", "dd ", "mkfs", "`", "$(", ">",
    "<", "&", "\n", "\r",
];

/// Programs a pipeline segment may start with.
pub const ALLOWED_COMMANDS: &[&str] = &[
    "ls", "cat", "head", "tail", "grep", "find", "wc", "echo", "pwd", "tree", "sort", "uniq",
    "diff", "file", "stat", "du", "which", "date", "git",
];

/// Read-only git subcommands.
pub const GIT_SUBCOMMANDS: &[&str] = &["log", "diff", "show", "status", "blame"];

/// Options that let an allowed program run other programs or modify files.
struct ForbiddenOptions {
    program: &'static str,
    /// Matched as prefixes, so `-execdir` and `--output=x` are covered.
    long: &'static [&'static str],
    /// Letters rejected anywhere in a single-dash cluster such as `-uo`.
    short: &'static [char],
}

const FORBIDDEN_OPTIONS: &[ForbiddenOptions] = &[
    ForbiddenOptions {
        program: "find",
        long: &["-exec", "-ok", "-delete", "-fprint", "-fls"],
        short: &[],
    },
    ForbiddenOptions {
        program: "sort",
        long: &["--output", "--compress-program"],
        short: &['o'],
    },
    ForbiddenOptions {
        program: "git",
        long: &["--output", "--ext-diff"],
        short: &[],
    },
    ForbiddenOptions {
        program: "tree",
        long: &[],
        short: &['o'],
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandRejection {
    #[error("command is empty")]
    Empty,

    #[error("blocked pattern '{}'", .pattern.escape_debug())]
    BlockedPattern { pattern: &'static str },

    #[error("pipeline contains an empty command")]
    EmptySegment,

    #[error("command '{program}' is not in the allow-list")]
    NotAllowed { program: String },

    #[error("git subcommand '{subcommand}' is not allowed (allowed: {})", GIT_SUBCOMMANDS.join(", "))]
    GitSubcommand { subcommand: String },

    #[error("option '{option}' of '{program}' is not allowed")]
    ForbiddenOption { program: String, option: String },
}

/// Validates `command` against the sandbox rules.
pub fn validate_command(command: &str) -> Result<(), CommandRejection> {
    if command.trim().is_empty() {
        return Err(CommandRejection::Empty);
    }

    if let Some(pattern) = first_contained(command, CHAINING_OPERATORS) {
        return Err(CommandRejection::BlockedPattern { pattern });
    }

    if command.contains(PATH_TRAVERSAL) {
        return Err(CommandRejection::BlockedPattern {
            pattern: PATH_TRAVERSAL,
        });
    }

    if let Some(pattern) = first_contained(command, DENYLIST) {
        return Err(CommandRejection::BlockedPattern { pattern });
    }

    for segment in command.split('|') {
        validate_segment(segment)?;
    }

    Ok(())
}

fn validate_segment(segment: &str) -> Result<(), CommandRejection> {
    let mut tokens = segment.split_whitespace();
    let Some(program) = tokens.next() else {
        return Err(CommandRejection::EmptySegment);
    };

    if !ALLOWED_COMMANDS.contains(&program) {
        return Err(CommandRejection::NotAllowed {
            program: program.to_string(),
        });
    }

    if program == "git" {
        let subcommand = tokens.next().unwrap_or_default();
        if !GIT_SUBCOMMANDS.contains(&subcommand) {
            return Err(CommandRejection::GitSubcommand {
                subcommand: subcommand.to_string(),
            });
        }
    }

    let Some(forbidden) = FORBIDDEN_OPTIONS
        .iter()
        .find(|options| options.program == program)
    else {
        return Ok(());
    };

    for token in tokens {
        if is_forbidden_option(forbidden, token) {
            return Err(CommandRejection::ForbiddenOption {
                program: program.to_string(),
                option: token.to_string(),
            });
        }
    }

    Ok(())
}

fn is_forbidden_option(forbidden: &ForbiddenOptions, token: &str) -> bool {
    // The shell removes quotes and backslashes, so `-e'x'ec` is `-exec`.
    let word: String = token
        .chars()
        .filter(|c| !matches!(c, '\'' | '"' | '\\'))
        .collect();

    // Brace expansion and option-position globs or variables can expand
    // into any option.
    if word.starts_with('{') {
        return true;
    }
    if word.starts_with('-') && word.contains(['*', '?', '[', '$']) {
        return true;
    }

    if forbidden.long.iter().any(|option| word.starts_with(option)) {
        return true;
    }

    if let Some(name) = word.strip_prefix("--") {
        // getopt accepts any unambiguous prefix of a long option.
        let name = name.split('=').next().unwrap_or_default();
        return !name.is_empty()
            && forbidden
                .long
                .iter()
                .filter_map(|option| option.strip_prefix("--"))
                .any(|option| option.starts_with(name));
    }

    match word.strip_prefix('-') {
        Some(cluster) => cluster.chars().any(|c| forbidden.short.contains(&c)),
        None => false,
    }
}

fn first_contained(command: &str, patterns: &[&'static str]) -> Option<&'static str> {
    patterns
        .iter()
        .copied()
        .find(|pattern| command.contains(pattern))
}
