//! Progress tracking for in-flight operations.
//!
//! The tracker owns the set of running operation ids and turns changes to
//! that set into visibility and spinner-text callbacks on a [`ProgressSink`].
//! Ids are reference counted so two overlapping runs for the same file do not
//! hide the spinner when the first one finishes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use linterhub_types::OperationId;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
pub const ASCII_SPINNER_FRAMES: [&str; 4] = ["-", "\\", "|", "/"];
/// Blank braille cell written when the spinner stops.
pub const IDLE_GLYPH: &str = "\u{2800}";

/// Receiver of progress changes.
///
/// Callbacks are made while the tracker's state is locked so they arrive in
/// order; implementations must not call back into the tracker.
pub trait ProgressSink: Send + Sync {
    fn visibility(&self, visible: bool);

    fn text(&self, text: &str);

    /// Called for every enqueue (`started = true`) and dequeue.
    fn operation(&self, _id: &OperationId, _started: bool) {}
}

#[must_use]
pub fn default_frames() -> &'static [&'static str] {
    if cfg!(windows) {
        &ASCII_SPINNER_FRAMES
    } else {
        &SPINNER_FRAMES
    }
}

struct State {
    active: HashMap<OperationId, usize>,
    visible: bool,
    spinner: Option<CancellationToken>,
    /// Bumped on every spinner start; stale spinner tasks compare against it.
    spin_generation: u64,
}

struct Inner {
    sink: Arc<dyn ProgressSink>,
    interval: Duration,
    frames: &'static [&'static str],
    state: Mutex<State>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared handle; clones observe the same set of operations.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<Inner>,
}

impl ProgressTracker {
    pub fn new(sink: Arc<dyn ProgressSink>, interval: Duration) -> Self {
        Self::with_frames(sink, interval, default_frames())
    }

    pub fn with_frames(
        sink: Arc<dyn ProgressSink>,
        interval: Duration,
        frames: &'static [&'static str],
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sink,
                interval,
                frames,
                state: Mutex::new(State {
                    active: HashMap::new(),
                    visible: false,
                    spinner: None,
                    spin_generation: 0,
                }),
            }),
        }
    }

    /// Register `id`. Shows progress if it was hidden.
    ///
    /// Returns whether this call made progress visible.
    pub fn enqueue(&self, id: &OperationId) -> bool {
        let mut state = self.inner.lock();
        *state.active.entry(id.clone()).or_default() += 1;
        self.inner.sink.operation(id, true);
        tracing::trace!(id = %id, active = state.active.len(), "Progress enqueue");

        if state.visible {
            return false;
        }
        self.show(&mut state);
        true
    }

    /// Release one registration of `id`. Hides progress once nothing is left.
    ///
    /// Returns whether this call hid progress. Unknown ids are ignored.
    pub fn dequeue(&self, id: &OperationId) -> bool {
        let mut state = self.inner.lock();
        let Some(count) = state.active.get_mut(id) else {
            tracing::trace!(id = %id, "Progress dequeue for unknown id");
            return false;
        };
        *count -= 1;
        if *count == 0 {
            state.active.remove(id);
        }
        self.inner.sink.operation(id, false);
        tracing::trace!(id = %id, active = state.active.len(), "Progress dequeue");

        if state.active.is_empty() && state.visible {
            self.hide(&mut state);
            return true;
        }
        false
    }

    /// Re-scope visibility to `id` without changing the registered set.
    ///
    /// Progress is shown when `id` or the system id is registered, and hidden
    /// otherwise. Returns the resulting visibility.
    pub fn update(&self, id: &OperationId) -> bool {
        let mut state = self.inner.lock();
        let show = state.active.contains_key(id)
            || state.active.keys().any(OperationId::is_system);
        if show && !state.visible {
            self.show(&mut state);
        } else if !show && state.visible {
            self.hide(&mut state);
        }
        show
    }

    #[must_use]
    pub fn is_active(&self, id: &OperationId) -> bool {
        self.inner.lock().active.contains_key(id)
    }

    /// Whether any operation is registered.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        !self.inner.lock().active.is_empty()
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.inner.lock().visible
    }

    /// RAII registration: enqueues now, dequeues on drop.
    #[must_use]
    pub fn track(&self, id: OperationId) -> ProgressGuard {
        self.enqueue(&id);
        ProgressGuard {
            tracker: self.clone(),
            id,
        }
    }

    /// Stop the spinner and hide progress, forgetting every registration.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.active.clear();
        if state.visible {
            self.hide(&mut state);
        }
    }

    fn show(&self, state: &mut State) {
        state.visible = true;
        self.inner.sink.visibility(true);
        self.start_spinner(state);
    }

    fn hide(&self, state: &mut State) {
        if let Some(token) = state.spinner.take() {
            token.cancel();
        }
        state.spin_generation += 1;
        state.visible = false;
        self.inner.sink.text(IDLE_GLYPH);
        self.inner.sink.visibility(false);
    }

    fn start_spinner(&self, state: &mut State) {
        if self.inner.frames.is_empty() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No async runtime; progress spinner disabled");
            return;
        };

        state.spin_generation += 1;
        let generation = state.spin_generation;
        let token = CancellationToken::new();
        state.spinner = Some(token.clone());

        let inner = Arc::downgrade(&self.inner);
        let period = self.inner.interval.max(Duration::from_millis(1));
        handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut frame = 0usize;
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(strong) = inner.upgrade() else { break };
                let state = strong.lock();
                if state.spin_generation != generation || !state.visible {
                    break;
                }
                strong.sink.text(strong.frames[frame % strong.frames.len()]);
                frame = frame.wrapping_add(1);
            }
        });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = state.spinner.take() {
            token.cancel();
        }
    }
}

/// Keeps an operation registered until dropped.
#[must_use = "dropping the guard ends the operation immediately"]
pub struct ProgressGuard {
    tracker: ProgressTracker,
    id: OperationId,
}

impl ProgressGuard {
    #[must_use]
    pub fn id(&self) -> &OperationId {
        &self.id
    }
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        self.tracker.dequeue(&self.id);
    }
}
