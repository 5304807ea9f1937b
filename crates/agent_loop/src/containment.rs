//! Lexical path containment.

use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

/// Returns true when `candidate` names `working_dir` itself or something below it.
///
/// Relative candidates are resolved against `working_dir`. Both sides are
/// cleaned lexically and compared with a trailing separator, so a sibling that
/// merely shares a name prefix (`project-evil` next to `project`) is outside.
/// Symlinks are not followed here; callers that touch the filesystem re-check
/// canonical paths.
pub fn is_contained(working_dir: &Path, candidate: &Path) -> bool {
    let root = with_trailing_separator(&clean_path(working_dir));
    let candidate = with_trailing_separator(&clean_path(&absolutize(working_dir, candidate)));
    candidate.starts_with(&root)
}

pub fn absolutize(working_dir: &Path, candidate: &Path) -> PathBuf {
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        working_dir.join(candidate)
    }
}

/// Removes `.` components and folds `..` into its parent without touching disk.
///
/// `..` at the root stays at the root. Leading `..` of a relative path is kept.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match cleaned.last() {
                Some(Component::Normal(_)) => {
                    cleaned.pop();
                }
                Some(Component::ParentDir) | None => cleaned.push(component),
                // root or prefix
                Some(_) => {}
            },
            other => cleaned.push(other),
        }
    }

    if cleaned.is_empty() {
        return PathBuf::from(".");
    }
    cleaned.iter().collect()
}

fn with_trailing_separator(path: &Path) -> String {
    let mut text = path.to_string_lossy().into_owned();
    if !text.ends_with(MAIN_SEPARATOR) {
        text.push(MAIN_SEPARATOR);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_with_shared_prefix_is_outside() {
        let root = Path::new("/home/user/project");
        assert!(!is_contained(root, Path::new("/home/user/project-evil")));
        assert!(!is_contained(root, Path::new("/home/user/project-evil/src/main.rs")));
    }

    #[test]
    fn working_dir_itself_and_children_are_inside() {
        let root = Path::new("/home/user/project");
        assert!(is_contained(root, Path::new("/home/user/project")));
        assert!(is_contained(root, Path::new("/home/user/project/")));
        assert!(is_contained(root, Path::new(".")));
        assert!(is_contained(root, Path::new("src/lib.rs")));
        assert!(is_contained(root, Path::new("/home/user/project/a/../b")));
    }

    #[test]
    fn traversal_and_foreign_absolute_paths_are_outside() {
        let root = Path::new("/home/user/project");
        assert!(!is_contained(root, Path::new("../secret")));
        assert!(!is_contained(root, Path::new("src/../../secret")));
        assert!(!is_contained(root, Path::new("/etc/passwd")));
        assert!(!is_contained(root, Path::new("/home/user")));
    }

    #[test]
    fn unclean_working_dir_is_normalized_too() {
        let root = Path::new("/home/user/./project/");
        assert!(is_contained(root, Path::new("notes.txt")));
        assert!(!is_contained(root, Path::new("/home/user/projects")));
    }

    #[test]
    fn clean_path_folds_components() {
        assert_eq!(clean_path(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(clean_path(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(clean_path(Path::new("../a/./b")), PathBuf::from("../a/b"));
        assert_eq!(clean_path(Path::new("a/..")), PathBuf::from("."));
    }
}
