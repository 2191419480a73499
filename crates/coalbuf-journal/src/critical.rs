//! Liveness hooks on the buffer's public operations.
//!
//! Every public operation is bracketed by enter/leave notifications on a
//! named path so an external watchdog can detect a stalled flush or a stuck
//! producer. Zero-cost observer pattern: when no analyzer is attached the
//! guard is inert and the compiler elides the calls.

use std::sync::Arc;

/// Named critical paths of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JournalPath {
    /// `start()`.
    Start,
    /// `stop()`.
    Stop,
    /// `check_size()`.
    CheckSize,
    /// `add_bytes()` / `add_record()`.
    AddBytes,
    /// `flush()` / `flush_force()` and timer-driven flushes.
    Flush,
    /// `set_observer()`.
    SetObserver,
}

/// Receives enter/leave notifications on named paths.
///
/// Implementations must not block and must not call back into the buffer.
pub trait PathAnalyzer: Send + Sync {
    /// A thread entered `path`.
    fn enter_path(&self, path: JournalPath);

    /// The thread that entered `path` left it.
    fn leave_path(&self, path: JournalPath);
}

/// RAII bracket: notifies `enter_path` on construction, `leave_path` on drop.
#[must_use]
pub(crate) struct PathGuard<'a> {
    analyzer: Option<&'a dyn PathAnalyzer>,
    path: JournalPath,
}

impl<'a> PathGuard<'a> {
    pub(crate) fn enter(
        analyzer: Option<&'a Arc<dyn PathAnalyzer>>,
        path: JournalPath,
    ) -> Self {
        let analyzer = analyzer.map(|analyzer| analyzer.as_ref());
        if let Some(analyzer) = analyzer {
            analyzer.enter_path(path);
        }
        Self { analyzer, path }
    }
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        if let Some(analyzer) = self.analyzer {
            analyzer.leave_path(self.path);
        }
    }
}
