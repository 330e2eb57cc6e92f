//! User-facing notices and the UI collaborators that display them.
//!
//! # Design
//! `Notifier` and `LoadingIndicator` are the seams to whatever UI hosts the
//! client (toast component, progress bar, terminal). The pipeline never talks
//! to them directly for errors: notices go through `DebouncedNotifier`, which
//! collapses bursts (for example every in-flight request failing at once when
//! a shared session expires) into a single notice.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const DEFAULT_NOTICE_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Warning,
    Error,
}

/// A message to show to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }
}

/// Displays notices to the user.
pub trait Notifier: Send + Sync {
    fn show(&self, notice: Notice);

    /// Close every notice currently on screen.
    fn close_all(&self) {}
}

/// Progress feedback for requests flagged with `loading`.
pub trait LoadingIndicator: Send + Sync {
    fn start(&self);
    fn done(&self);
}

/// Notifier that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn show(&self, _notice: Notice) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIndicator;

impl LoadingIndicator for NoopIndicator {
    fn start(&self) {}
    fn done(&self) {}
}

/// Keeps every notice it is shown. Useful for headless hosts and tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<Notice>>,
    closed: AtomicUsize,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> Vec<Notice> {
        lock(&self.shown).clone()
    }

    pub fn messages(&self) -> Vec<String> {
        lock(&self.shown).iter().map(|notice| notice.message.clone()).collect()
    }

    pub fn close_all_calls(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Notifier for RecordingNotifier {
    fn show(&self, notice: Notice) {
        lock(&self.shown).push(notice);
    }

    fn close_all(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct DebounceState {
    generation: u64,
    pending: Option<Notice>,
}

/// Trailing-edge de-bounce in front of a `Notifier`.
///
/// A notice is shown once `window` has passed without another notice
/// arriving; the latest notice of a burst wins. Visible notices are closed
/// before a new one is shown. Outside a tokio runtime, or with a zero
/// window, notices are shown immediately.
#[derive(Clone)]
pub struct DebouncedNotifier {
    inner: Arc<dyn Notifier>,
    window: Duration,
    state: Arc<Mutex<DebounceState>>,
}

impl std::fmt::Debug for DebouncedNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebouncedNotifier")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl DebouncedNotifier {
    pub fn new(inner: Arc<dyn Notifier>, window: Duration) -> Self {
        Self {
            inner,
            window,
            state: Arc::new(Mutex::new(DebounceState::default())),
        }
    }

    pub fn notify(&self, notice: Notice) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) if !self.window.is_zero() => runtime,
            _ => {
                display(self.inner.as_ref(), notice);
                return;
            }
        };

        let generation = {
            let mut state = lock(&self.state);
            state.generation = state.generation.wrapping_add(1);
            state.pending = Some(notice);
            state.generation
        };

        let inner = Arc::clone(&self.inner);
        let state = Arc::clone(&self.state);
        let window = self.window;
        runtime.spawn(async move {
            tokio::time::sleep(window).await;
            let notice = {
                let mut state = lock(&state);
                if state.generation != generation {
                    return;
                }
                state.pending.take()
            };
            if let Some(notice) = notice {
                display(inner.as_ref(), notice);
            }
        });
    }

    /// Show `notice` immediately, bypassing the window. Visible notices stay
    /// open and a pending notice is left to fire on schedule.
    pub fn show_now(&self, notice: Notice) {
        self.inner.show(notice);
    }

    /// Show the pending notice now instead of waiting out the window.
    pub fn flush(&self) {
        let notice = {
            let mut state = lock(&self.state);
            state.generation = state.generation.wrapping_add(1);
            state.pending.take()
        };
        if let Some(notice) = notice {
            display(self.inner.as_ref(), notice);
        }
    }
}

fn display(notifier: &dyn Notifier, notice: Notice) {
    notifier.close_all();
    notifier.show(notice);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
