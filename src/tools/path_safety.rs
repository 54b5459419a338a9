//! Path Safety Checks
//!
//! Arguments that look like filesystem paths are re-checked before a command
//! is allowed to run. Traversal detection is lexical: the path is normalized
//! without touching the filesystem, and any `..` component that survives
//! normalization is treated as an escape attempt.
//!
//! Whether a (non-traversing) path is acceptable is delegated to a
//! [`PathSafety`] implementation so embedders can plug in their own policy.

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Policy deciding whether a path argument may be handed to a child process
pub trait PathSafety: Send + Sync + fmt::Debug {
    /// Returns `true` if the path is safe to pass to a child process
    fn is_path_safe(&self, path: &str) -> bool;
}

/// Characters that have no business in a path handed to an allow-listed tool
const UNSAFE_PATH_CHARS: [char; 7] = ['*', '?', '$', '`', '"', '\'', '\0'];

/// Locations that are never acceptable as tool arguments
const DEFAULT_DENIED_PREFIXES: [&str; 6] = [
    "/etc/shadow",
    "/etc/gshadow",
    "/etc/sudoers",
    "/root/.ssh",
    "/proc/self/environ",
    "/proc/self/mem",
];

/// Default path policy
///
/// Rejects control characters, shell glob/expansion characters, leading `~`
/// and a small set of credential-bearing system locations.
#[derive(Debug, Clone)]
pub struct DefaultPathSafety {
    denied_prefixes: Vec<PathBuf>,
}

impl Default for DefaultPathSafety {
    fn default() -> Self {
        Self {
            denied_prefixes: DEFAULT_DENIED_PREFIXES.iter().map(PathBuf::from).collect(),
        }
    }
}

impl DefaultPathSafety {
    /// Create a policy with additional denied locations
    pub fn with_denied_prefixes<I, P>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut policy = Self::default();
        policy
            .denied_prefixes
            .extend(prefixes.into_iter().map(Into::into));
        policy
    }
}

impl PathSafety for DefaultPathSafety {
    fn is_path_safe(&self, path: &str) -> bool {
        if path.is_empty() || path.starts_with('~') {
            return false;
        }
        if path
            .chars()
            .any(|c| c.is_control() || UNSAFE_PATH_CHARS.contains(&c))
        {
            return false;
        }

        let normalized = normalize_lexically(&to_forward_slashes(path));
        !self
            .denied_prefixes
            .iter()
            .any(|prefix| normalized.starts_with(prefix))
    }
}

/// Normalize a path without consulting the filesystem
///
/// `.` components are dropped and `..` pops the previous normal component.
/// A `..` directly below the root is discarded (you cannot go above `/`);
/// a leading `..` on a relative path is kept so callers can detect it.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    parts.iter().map(|c| c.as_os_str()).collect()
}

/// Returns `true` if the normalized path still climbs out of its start point
pub fn escapes_start(path: &str) -> bool {
    normalize_lexically(&to_forward_slashes(path))
        .components()
        .any(|c| matches!(c, Component::ParentDir))
}

/// Treat `\` as a separator regardless of host platform
fn to_forward_slashes(path: &str) -> PathBuf {
    PathBuf::from(path.replace('\\', "/"))
}
