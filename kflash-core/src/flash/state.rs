//! Flash state machine and its observable snapshots.
//!
//! A [`FlashStateMachine`] is the only writer of a flash's [`FlashState`]. After every accepted
//! mutation it publishes an immutable `Arc<FlashState>` into its [`FlashMonitor`] and, when a
//! channel is attached, pushes a [`FlashEvent`].

use super::progress::{strip_ui_print, MarkerSet, Milestone};
use crate::config::ProgressMarker;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlashPhase {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

impl FlashPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, FlashPhase::Completed | FlashPhase::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlashState {
    pub phase: FlashPhase,
    pub is_flashing: bool,
    pub is_completed: bool,
    /// Empty unless the flash failed.
    pub error: String,
    pub progress: f32,
    pub current_step: String,
    pub logs: Vec<String>,
}

impl FlashState {
    /// Accumulated log text, verbatim. The failure reason stays in `error`.
    pub fn export_log(&self) -> String {
        self.logs.join("\n")
    }
}

/// Push notification for observers that do not want to poll.
#[derive(Debug, Clone, PartialEq)]
pub enum FlashEvent {
    Started,
    Step { step: String, progress: f32 },
    Line(String),
    Completed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {action} a flash that is {phase:?}")]
pub struct TransitionError {
    pub phase: FlashPhase,
    pub action: &'static str,
}

/// Read side of a flash: the latest published snapshot.
#[derive(Debug, Clone, Default)]
pub struct FlashMonitor {
    current: Arc<RwLock<Arc<FlashState>>>,
}

impl FlashMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<FlashState> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Force a non-terminal snapshot to `Failed`, keeping its logs. Returns false when the
    /// snapshot had already reached a terminal phase.
    pub fn fail_unfinished(&self, error: &str) -> bool {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.phase.is_terminal() {
            return false;
        }
        let mut state = FlashState::clone(&guard);
        state.phase = FlashPhase::Failed;
        state.is_flashing = false;
        state.is_completed = false;
        state.error = error.to_string();
        *guard = Arc::new(state);
        true
    }

    fn publish(&self, state: &FlashState) {
        let next = Arc::new(state.clone());
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

pub struct FlashStateMachine {
    state: FlashState,
    monitor: FlashMonitor,
    events: Option<SyncSender<FlashEvent>>,
    markers: MarkerSet,
}

impl FlashStateMachine {
    pub fn new(markers: &[ProgressMarker]) -> Self {
        Self::with_monitor(markers, FlashMonitor::new())
    }

    /// Write into an existing monitor (the one a session handed out before starting).
    pub fn with_monitor(markers: &[ProgressMarker], monitor: FlashMonitor) -> Self {
        let machine = Self {
            state: FlashState::default(),
            monitor,
            events: None,
            markers: MarkerSet::new(markers),
        };
        machine.monitor.publish(&machine.state);
        machine
    }

    pub fn with_events(mut self, tx: SyncSender<FlashEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn monitor(&self) -> FlashMonitor {
        self.monitor.clone()
    }

    pub fn state(&self) -> &FlashState {
        &self.state
    }

    pub fn phase(&self) -> FlashPhase {
        self.state.phase
    }

    /// Idle -> Running.
    pub fn begin(&mut self, step: &str) -> Result<(), TransitionError> {
        self.require(FlashPhase::Idle, "begin")?;
        self.state = FlashState {
            phase: FlashPhase::Running,
            is_flashing: true,
            current_step: step.to_string(),
            ..FlashState::default()
        };
        self.publish(FlashEvent::Started);
        Ok(())
    }

    /// Move to a new step; progress never goes backwards.
    pub fn advance(&mut self, step: &str, progress: f32) -> Result<(), TransitionError> {
        self.require(FlashPhase::Running, "advance")?;
        self.state.current_step = step.to_string();
        self.raise_progress(progress);
        self.publish(FlashEvent::Step {
            step: step.to_string(),
            progress: self.state.progress,
        });
        Ok(())
    }

    pub fn milestone(&mut self, milestone: Milestone) -> Result<(), TransitionError> {
        self.advance(milestone.label(), milestone.progress())
    }

    /// Append a line of installer output, updating progress when it carries a marker.
    pub fn record_line(&mut self, line: &str) -> Result<(), TransitionError> {
        self.require(FlashPhase::Running, "log to")?;
        let text = strip_ui_print(line).to_string();
        if let Some(progress) = self.markers.classify(&text) {
            self.state.current_step = text.clone();
            self.raise_progress(progress);
        }
        self.state.logs.push(text.clone());
        self.publish(FlashEvent::Line(text));
        Ok(())
    }

    /// Running -> Completed.
    pub fn complete(&mut self) -> Result<(), TransitionError> {
        self.require(FlashPhase::Running, "complete")?;
        self.state.phase = FlashPhase::Completed;
        self.state.is_flashing = false;
        self.state.is_completed = true;
        self.state.progress = 1.0;
        self.publish(FlashEvent::Completed);
        Ok(())
    }

    /// Idle | Running -> Failed. Logs are kept.
    pub fn fail(&mut self, error: &str) -> Result<(), TransitionError> {
        if self.state.phase.is_terminal() {
            return Err(self.refused("fail"));
        }
        let error = if error.trim().is_empty() {
            "Flash failed".to_string()
        } else {
            error.to_string()
        };
        self.state.phase = FlashPhase::Failed;
        self.state.is_flashing = false;
        self.state.is_completed = false;
        self.state.error = error.clone();
        self.publish(FlashEvent::Failed(error));
        Ok(())
    }

    fn raise_progress(&mut self, progress: f32) {
        let progress = progress.clamp(0.0, 1.0);
        if progress > self.state.progress {
            self.state.progress = progress;
        }
    }

    fn require(&self, phase: FlashPhase, action: &'static str) -> Result<(), TransitionError> {
        if self.state.phase == phase {
            Ok(())
        } else {
            Err(self.refused(action))
        }
    }

    fn refused(&self, action: &'static str) -> TransitionError {
        TransitionError {
            phase: self.state.phase,
            action,
        }
    }

    fn publish(&mut self, event: FlashEvent) {
        self.monitor.publish(&self.state);
        let Some(tx) = &self.events else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::debug!("flash event channel full, event dropped"),
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("flash event receiver gone");
                self.events = None;
            }
        }
    }
}
