//! User-facing diagnostics channel.
//!
//! Drivers report recoverable problems (statements rejected by the checker,
//! orphaned messages) here instead of failing. Hosts can write to the same
//! observer, and read back the worst level seen as an exit status.

use std::io::Write;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use serde::Serialize;

use crate::types::Range;

/// Notification severity; the discriminant is the exit status it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Level {
    Warning = 2,
    Error = 3,
}

impl Level {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// What the notification is about (usually the chunk text).
    pub subject: String,
    pub message: String,
    pub location: Option<Range>,
    pub level: Level,
}

impl Notification {
    /// `<header> (<LEVEL>/<n>) <message>`, continuation lines indented.
    pub fn render(&self) -> String {
        let header = self
            .location
            .as_ref()
            .map_or_else(|| "!!".to_string(), Range::as_header);
        let message = self.message.trim_end().replace('\n', "\n   ");
        format!(
            "{header} ({}/{}) {message}",
            self.level.name(),
            self.level.code()
        )
    }
}

pub trait Observer: Send + Sync {
    fn notify(&self, notification: Notification);

    /// Worst level notified so far, 0 if none.
    fn exit_code(&self) -> i32;
}

/// Running maximum of notification levels.
#[derive(Debug, Default)]
struct SeverityTracker(AtomicI32);

impl SeverityTracker {
    fn record(&self, level: Level) {
        self.0.fetch_max(level.code(), Ordering::Relaxed);
    }

    fn get(&self) -> i32 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Writes every notification to standard error.
#[derive(Debug, Default)]
pub struct StderrObserver {
    severity: SeverityTracker,
}

impl StderrObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Observer for StderrObserver {
    fn notify(&self, notification: Notification) {
        self.severity.record(notification.level);
        let mut stderr = std::io::stderr().lock();
        if let Err(e) = writeln!(stderr, "{}", notification.render()) {
            tracing::warn!(error = %e, "Failed to write notification to stderr");
        }
    }

    fn exit_code(&self) -> i32 {
        self.severity.get()
    }
}

/// Keeps notifications in memory.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    notifications: Mutex<Vec<Notification>>,
    severity: SeverityTracker,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything notified so far, in order.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .map(|n| n.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn count(&self, level: Level) -> usize {
        self.notifications()
            .iter()
            .filter(|n| n.level == level)
            .count()
    }
}

impl Observer for CollectingObserver {
    fn notify(&self, notification: Notification) {
        self.severity.record(notification.level);
        tracing::debug!(level = ?notification.level, "{}", notification.message);
        match self.notifications.lock() {
            Ok(mut n) => n.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
    }

    fn exit_code(&self) -> i32 {
        self.severity.get()
    }
}

fn global_slot() -> &'static RwLock<Arc<dyn Observer>> {
    static GLOBAL: OnceLock<RwLock<Arc<dyn Observer>>> = OnceLock::new();
    GLOBAL.get_or_init(|| {
        let observer: Arc<dyn Observer> = Arc::new(StderrObserver::new());
        RwLock::new(observer)
    })
}

/// The process-wide default observer (a [`StderrObserver`] unless replaced).
pub fn global() -> Arc<dyn Observer> {
    match global_slot().read() {
        Ok(slot) => Arc::clone(&*slot),
        Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
    }
}

/// Replace the process-wide default observer. Drivers created afterwards
/// pick it up.
pub fn set_global(observer: Arc<dyn Observer>) {
    match global_slot().write() {
        Ok(mut slot) => *slot = observer,
        Err(poisoned) => *poisoned.into_inner() = observer,
    }
}
