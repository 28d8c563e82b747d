use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};

use crate::engine::manifest::IconImage;

/// Coarse worker state, used by the view to pick a progress panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Inspecting,
    Extracting,
    Submitting,
    Installing,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Idle => "IDLE",
            Phase::Inspecting => "INSPECT",
            Phase::Extracting => "EXTRACT",
            Phase::Submitting => "SUBMIT",
            Phase::Installing => "INSTALL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    pub in_progress: bool,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub units_done: u32,
    pub units_total: u32,
    pub title_id: u64,
}

impl ProgressSnapshot {
    pub fn sanitized(mut self) -> Self {
        self.bytes_done = self.bytes_done.min(self.bytes_total);
        self.units_done = self.units_done.min(self.units_total);
        self
    }

    /// Fraction of bytes written, once any have been.
    pub fn fraction(&self) -> Option<f64> {
        if self.bytes_done == 0 || self.bytes_total == 0 {
            return None;
        }
        Some((self.bytes_done as f64 / self.bytes_total as f64).clamp(0.0, 1.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionStatus {
    pub package: String,
    pub entry: String,
    pub units_done: u32,
    pub units_total: u32,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub phase: Phase,
    pub progress: ProgressSnapshot,
    pub extraction: Option<ExtractionStatus>,
    /// Queue path (or staged entry) handed to the gateway last.
    pub installing: Option<String>,
    pub icon: Option<Arc<IconImage>>,
    /// Per-entry failures not yet shown, oldest first.
    pub errors: VecDeque<String>,
}

/// Failures beyond this many unread ones drop the oldest.
pub const MAX_PENDING_ERRORS: usize = 32;

/// Worker-written, foreground-read status. Readers only ever get copies.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<WorkerStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> WorkerStatus {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut WorkerStatus)) {
        let mut status = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut status);
    }

    pub fn set_phase(&self, phase: Phase) {
        self.update(|status| status.phase = phase);
    }

    pub fn push_error(&self, message: String) {
        self.update(|status| {
            status.errors.push_back(message);
            while status.errors.len() > MAX_PENDING_ERRORS {
                status.errors.pop_front();
            }
        });
    }

    pub fn take_error(&self) -> Option<String> {
        let mut status = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        status.errors.pop_front()
    }
}
