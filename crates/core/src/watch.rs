//! Cross-tab change handling: coalesce bursts of store change events into
//! one reload, and suppress reloads for a short window after a local write
//! so an echo of our own save never clobbers newer in-flight state.

use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use crate::store::ChangeEvent;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Window applied after a local force-save during which feed events are
/// treated as echoes of our own write and dropped.
pub const DEFAULT_SUPPRESSION: Duration = Duration::from_millis(1000);

/// Debounced reload decision. All time is injected, so the gate is fully
/// deterministic under test.
#[derive(Debug)]
pub struct ReloadGate {
    debounce: Duration,
    pending_since: Option<Instant>,
    suppress_until: Option<Instant>,
}

impl Default for ReloadGate {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl ReloadGate {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending_since: None,
            suppress_until: None,
        }
    }

    fn is_suppressed(&self, now: Instant) -> bool {
        self.suppress_until.map(|until| now < until).unwrap_or(false)
    }

    /// Record one change-feed event. Events inside the suppression window
    /// are dropped; local state is newer than the echo.
    pub fn note_change(&mut self, now: Instant) {
        if self.is_suppressed(now) {
            return;
        }
        self.pending_since = Some(now);
    }

    /// Open the suppression window after a local write. Extends but never
    /// shortens an already-open window.
    pub fn suppress_for(&mut self, window: Duration, now: Instant) {
        let until = now + window;
        self.suppress_until = Some(match self.suppress_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }

    /// True once pending changes have been quiet for the debounce window.
    /// A reload pending from before the suppression window opened stays
    /// deferred until the window closes. Consumes the pending state.
    pub fn should_reload(&mut self, now: Instant) -> bool {
        if self.is_suppressed(now) {
            return false;
        }
        let Some(since) = self.pending_since else {
            return false;
        };
        if now.duration_since(since) < self.debounce {
            return false;
        }
        self.pending_since = None;
        true
    }
}

/// Pairs a live change-feed receiver with a [`ReloadGate`]. The owner pumps
/// it periodically and reloads when it says so.
pub struct ChangeListener {
    feed: Receiver<ChangeEvent>,
    gate: ReloadGate,
}

impl ChangeListener {
    pub fn new(feed: Receiver<ChangeEvent>) -> Self {
        Self {
            feed,
            gate: ReloadGate::default(),
        }
    }

    pub fn with_gate(feed: Receiver<ChangeEvent>, gate: ReloadGate) -> Self {
        Self { feed, gate }
    }

    /// Drain available feed events, then report whether a reload is due.
    pub fn pump(&mut self, now: Instant) -> bool {
        while let Ok(event) = self.feed.try_recv() {
            tracing::debug!(doc_id = %event.id, seq = event.seq, "external change observed");
            self.gate.note_change(now);
        }
        self.gate.should_reload(now)
    }

    pub fn suppress_for(&mut self, window: Duration, now: Instant) {
        self.gate.suppress_for(window, now);
    }
}
