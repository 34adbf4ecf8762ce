//! File-change notifications
//!
//! The watcher itself lives outside the engine; it delivers [`WatchEvent`]s,
//! which the host routes to a manager through the matching [`WatchFolder`].

use std::path::{Path, PathBuf};

use crate::module::image::MODULE_EXTENSION;

/// What happened to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    Created,
    Changed,
    Deleted,
}

/// One notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
    /// Raised by the startup scan; bypasses the folder's `enabled` flag
    pub initial: bool,
}

impl WatchEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(WatchEventKind::Created, path)
    }

    pub fn changed(path: impl Into<PathBuf>) -> Self {
        Self::new(WatchEventKind::Changed, path)
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::new(WatchEventKind::Deleted, path)
    }

    /// Startup-scan notification for an existing file
    pub fn initial(path: impl Into<PathBuf>) -> Self {
        Self {
            initial: true,
            ..Self::created(path)
        }
    }

    fn new(kind: WatchEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            initial: false,
        }
    }
}

/// A watched directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchFolder {
    pub directory: PathBuf,
    pub extension: String,
    pub enabled: bool,
}

impl WatchFolder {
    pub fn new<P: AsRef<Path>>(directory: P, enabled: bool) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            extension: MODULE_EXTENSION.to_string(),
            enabled,
        }
    }

    /// Whether this folder should handle `event`
    pub fn matches(&self, event: &WatchEvent) -> bool {
        if !(self.enabled || event.initial) {
            return false;
        }
        let in_folder = event.path.parent() == Some(self.directory.as_path());
        let ext_ok = event
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case(&self.extension));
        in_folder && ext_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_folder_only_takes_initial_events() {
        let folder = WatchFolder::new("/srv/modules", false);
        assert!(!folder.matches(&WatchEvent::changed("/srv/modules/a.amod")));
        assert!(folder.matches(&WatchEvent::initial("/srv/modules/a.amod")));
    }

    #[test]
    fn test_folder_and_extension_must_match() {
        let folder = WatchFolder::new("/srv/modules", true);
        assert!(folder.matches(&WatchEvent::created("/srv/modules/a.amod")));
        assert!(!folder.matches(&WatchEvent::created("/srv/modules/a.txt")));
        assert!(!folder.matches(&WatchEvent::created("/srv/modules/sub/a.amod")));
        assert!(!folder.matches(&WatchEvent::created("/srv/extensions/a.amod")));
    }
}
