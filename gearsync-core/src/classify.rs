//! Event classification.
//!
//! Turns a normalized [`FsEvent`] into zero or more [`Routing`] decisions by
//! looking at the event kind and at which pattern the file name matches.
//! Nothing here touches the file system or the network.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::Result;

pub const DEFAULT_SCRIPT_PATTERN: &str = "*.py";
pub const DEFAULT_REQUIREMENTS_PATTERN: &str = "*requirements*.txt";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FsEventKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

/// A file system change, already restricted to the watched roots.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub src_path: PathBuf,
    /// Destination of a [`FsEventKind::Moved`] event.
    pub dest_path: Option<PathBuf>,
}

impl FsEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::single(FsEventKind::Created, path)
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::single(FsEventKind::Modified, path)
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::single(FsEventKind::Deleted, path)
    }

    pub fn moved(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            kind: FsEventKind::Moved,
            src_path: from.into(),
            dest_path: Some(to.into()),
        }
    }

    fn single(kind: FsEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            src_path: path.into(),
            dest_path: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileCategory {
    Script,
    Requirements,
    Other,
}

/// What happened to a single path once moves are split in two.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PathChange {
    Appeared,
    Vanished,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SyncAction {
    Register,
    Unregister,
    UpdateDependencies,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncAction::Register => "register",
            SyncAction::Unregister => "unregister",
            SyncAction::UpdateDependencies => "update-dependencies",
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Routing {
    /// Debounce `action` on `path`.
    Schedule { path: PathBuf, action: SyncAction },
    /// Recognized file, but the change has no remote counterpart.
    Unsupported { path: PathBuf },
    /// Not a file this process manages.
    Ignore { path: PathBuf },
}

/// Compiled file name patterns.
///
/// Matching is case-insensitive and `*` also matches `/`, so a bare `*.py`
/// matches any Python file below the watched directory.
#[derive(Clone, Debug)]
pub struct FilePatterns {
    script: GlobSet,
    requirements: GlobSet,
    ignore: GlobSet,
}

impl FilePatterns {
    pub fn new(script: &str, requirements: &str, ignore: &[String]) -> Result<Self> {
        Ok(Self {
            script: single_set(script)?,
            requirements: single_set(requirements)?,
            ignore: build_set(ignore.iter().map(String::as_str))?,
        })
    }

    pub fn category(&self, path: &Path) -> FileCategory {
        if self.script.is_match(path) {
            FileCategory::Script
        } else if self.requirements.is_match(path) {
            FileCategory::Requirements
        } else {
            FileCategory::Other
        }
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        !self.ignore.is_empty() && self.ignore.is_match(path)
    }
}

fn glob(pattern: &str) -> Result<Glob> {
    Ok(GlobBuilder::new(pattern)
        .case_insensitive(true)
        .literal_separator(false)
        .build()?)
}

fn single_set(pattern: &str) -> Result<GlobSet> {
    build_set(std::iter::once(pattern))
}

fn build_set<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(glob(pattern)?);
    }
    Ok(builder.build()?)
}

/// Route `event`. Moves yield one decision for each side.
pub fn classify(patterns: &FilePatterns, event: &FsEvent) -> Vec<Routing> {
    match (event.kind, event.dest_path.as_deref()) {
        (FsEventKind::Created | FsEventKind::Modified, _) => {
            vec![route(patterns, &event.src_path, PathChange::Appeared)]
        }
        (FsEventKind::Deleted, _) | (FsEventKind::Moved, None) => {
            vec![route(patterns, &event.src_path, PathChange::Vanished)]
        }
        (FsEventKind::Moved, Some(dest)) => vec![
            route(patterns, &event.src_path, PathChange::Vanished),
            route(patterns, dest, PathChange::Appeared),
        ],
    }
}

fn route(patterns: &FilePatterns, path: &Path, change: PathChange) -> Routing {
    let path = path.to_path_buf();
    let action = match (patterns.category(&path), change) {
        (FileCategory::Script, PathChange::Appeared) => SyncAction::Register,
        (FileCategory::Script, PathChange::Vanished) => SyncAction::Unregister,
        (FileCategory::Requirements, PathChange::Appeared) => SyncAction::UpdateDependencies,
        (FileCategory::Requirements, PathChange::Vanished) => {
            return Routing::Unsupported { path };
        }
        (FileCategory::Other, _) => return Routing::Ignore { path },
    };
    Routing::Schedule { path, action }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> FilePatterns {
        FilePatterns::new(DEFAULT_SCRIPT_PATTERN, DEFAULT_REQUIREMENTS_PATTERN, &[]).unwrap()
    }

    fn schedule(path: &str, action: SyncAction) -> Routing {
        Routing::Schedule {
            path: PathBuf::from(path),
            action,
        }
    }

    #[test]
    fn script_changes_register() {
        let patterns = defaults();
        for event in [
            FsEvent::created("/srv/gears/a.py"),
            FsEvent::modified("/srv/gears/a.py"),
        ] {
            assert_eq!(
                classify(&patterns, &event),
                vec![schedule("/srv/gears/a.py", SyncAction::Register)]
            );
        }
    }

    #[test]
    fn deleted_script_unregisters() {
        let routed = classify(&defaults(), &FsEvent::deleted("/srv/gears/a.py"));
        assert_eq!(routed, vec![schedule("/srv/gears/a.py", SyncAction::Unregister)]);
    }

    #[test]
    fn requirements_changes_update_dependencies() {
        let routed = classify(
            &defaults(),
            &FsEvent::modified("/srv/gears/dev-requirements.txt"),
        );
        assert_eq!(
            routed,
            vec![schedule(
                "/srv/gears/dev-requirements.txt",
                SyncAction::UpdateDependencies
            )]
        );
    }

    #[test]
    fn deleted_requirements_are_unsupported() {
        let routed = classify(
            &defaults(),
            &FsEvent::deleted("/srv/gears/requirements.txt"),
        );
        assert_eq!(
            routed,
            vec![Routing::Unsupported {
                path: PathBuf::from("/srv/gears/requirements.txt")
            }]
        );
    }

    #[test]
    fn unrelated_files_are_ignored() {
        let routed = classify(&defaults(), &FsEvent::modified("/srv/gears/notes.md"));
        assert_eq!(
            routed,
            vec![Routing::Ignore {
                path: PathBuf::from("/srv/gears/notes.md")
            }]
        );
    }

    #[test]
    fn move_routes_each_side_independently() {
        let routed = classify(
            &defaults(),
            &FsEvent::moved("/srv/gears/a.py", "/srv/gears/b.py"),
        );
        assert_eq!(
            routed,
            vec![
                schedule("/srv/gears/a.py", SyncAction::Unregister),
                schedule("/srv/gears/b.py", SyncAction::Register),
            ]
        );
    }

    #[test]
    fn script_renamed_to_unmatched_name_only_unregisters() {
        let routed = classify(
            &defaults(),
            &FsEvent::moved("/srv/gears/old.py", "/srv/gears/new.txt"),
        );
        assert_eq!(
            routed,
            vec![
                schedule("/srv/gears/old.py", SyncAction::Unregister),
                Routing::Ignore {
                    path: PathBuf::from("/srv/gears/new.txt")
                },
            ]
        );
    }

    #[test]
    fn move_across_categories() {
        let routed = classify(
            &defaults(),
            &FsEvent::moved("/srv/gears/draft.txt", "/srv/gears/requirements.txt"),
        );
        assert_eq!(
            routed,
            vec![
                Routing::Ignore {
                    path: PathBuf::from("/srv/gears/draft.txt")
                },
                schedule("/srv/gears/requirements.txt", SyncAction::UpdateDependencies),
            ]
        );
    }

    #[test]
    fn matching_is_case_insensitive_and_crosses_directories() {
        let patterns = defaults();
        assert_eq!(
            patterns.category(Path::new("/srv/gears/nested/deep/Job.PY")),
            FileCategory::Script
        );
        assert_eq!(
            patterns.category(Path::new("/srv/gears/REQUIREMENTS.txt")),
            FileCategory::Requirements
        );
    }

    #[test]
    fn script_pattern_wins_over_requirements_pattern() {
        let patterns = FilePatterns::new("*.txt", "*requirements*.txt", &[]).unwrap();
        assert_eq!(
            patterns.category(Path::new("/srv/requirements.txt")),
            FileCategory::Script
        );
    }

    #[test]
    fn ignore_patterns_match_paths() {
        let patterns = FilePatterns::new(
            "*.py",
            "*requirements*.txt",
            &["*/__pycache__/*".to_string(), "*.swp".to_string()],
        )
        .unwrap();
        assert!(patterns.is_ignored(Path::new("/srv/gears/__pycache__/a.py")));
        assert!(patterns.is_ignored(Path::new("/srv/gears/.a.py.swp")));
        assert!(!patterns.is_ignored(Path::new("/srv/gears/a.py")));
        assert!(!defaults().is_ignored(Path::new("/srv/gears/a.py")));
    }

    #[test]
    fn invalid_glob_is_a_setup_error() {
        let err = FilePatterns::new("[", DEFAULT_REQUIREMENTS_PATTERN, &[]).unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::Setup);
    }
}
