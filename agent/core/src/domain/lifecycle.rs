// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Process Tree Lifecycle
//!
//! Events raised by the process runtime and the phases they move a process
//! through. The manager process walks the manager phases, every worker process
//! walks the worker phases for its own id.
//!
//! ## Transition Table
//! | Phase | Event | Next Phase |
//! |-------|-------|------------|
//! | `ManagerStarting` | `ManagerStart` | `ManagerRunning` |
//! | `ManagerRunning` | `WorkerError` | `ManagerRunning` |
//! | `ManagerRunning` | `ManagerStop` | `ManagerStopping` |
//! | `WorkerStarting(id)` | `WorkerStart(id)` | `WorkerRunning(id)` |
//! | `WorkerRunning(id)` | `WorkerStop(id)` | `WorkerStopping(id)` |
//!
//! `ManagerStopping` and `WorkerStopping` settle into their `*Stopped` phase
//! once the corresponding handler has finished.

use std::fmt;
use thiserror::Error;

/// Why a worker left its accept loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStopReason {
    /// The whole tree is shutting down
    Shutdown,
    /// The slot is being recycled (reload or `max_request` reached)
    Recycle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    ManagerStart,
    WorkerStart {
        worker_id: usize,
    },
    WorkerError {
        worker_id: usize,
        pid: u32,
        exit_code: i32,
    },
    WorkerStop {
        worker_id: usize,
        reason: WorkerStopReason,
    },
    ManagerStop,
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::ManagerStart => "ManagerStart",
            LifecycleEvent::WorkerStart { .. } => "WorkerStart",
            LifecycleEvent::WorkerError { .. } => "WorkerError",
            LifecycleEvent::WorkerStop { .. } => "WorkerStop",
            LifecycleEvent::ManagerStop => "ManagerStop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    ManagerStarting,
    ManagerRunning,
    ManagerStopping,
    ManagerStopped,
    WorkerStarting(usize),
    WorkerRunning(usize),
    WorkerStopping(usize),
    WorkerStopped(usize),
}

impl LifecyclePhase {
    /// Phase reached by applying `event`, or an error when the event is not
    /// valid in the current phase.
    pub fn on_event(self, event: &LifecycleEvent) -> Result<Self, LifecycleError> {
        use LifecycleEvent as E;
        use LifecyclePhase as P;

        match (self, event) {
            (P::ManagerStarting, E::ManagerStart) => Ok(P::ManagerRunning),
            (P::ManagerRunning, E::WorkerError { .. }) => Ok(P::ManagerRunning),
            // A crash reported while workers are being stopped is still recorded.
            (P::ManagerStopping, E::WorkerError { .. }) => Ok(P::ManagerStopping),
            (P::ManagerRunning, E::ManagerStop) => Ok(P::ManagerStopping),
            (P::WorkerStarting(id), E::WorkerStart { worker_id }) if id == *worker_id => {
                Ok(P::WorkerRunning(id))
            }
            (P::WorkerRunning(id), E::WorkerStop { worker_id, .. }) if id == *worker_id => {
                Ok(P::WorkerStopping(id))
            }
            (phase, event) => Err(LifecycleError::InvalidTransition {
                phase,
                event: event.name(),
            }),
        }
    }

    /// Terminal phase a `*Stopping` phase settles into
    pub fn settle(self) -> Self {
        match self {
            LifecyclePhase::ManagerStopping => LifecyclePhase::ManagerStopped,
            LifecyclePhase::WorkerStopping(id) => LifecyclePhase::WorkerStopped(id),
            other => other,
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::ManagerStarting => write!(f, "manager-starting"),
            LifecyclePhase::ManagerRunning => write!(f, "manager-running"),
            LifecyclePhase::ManagerStopping => write!(f, "manager-stopping"),
            LifecyclePhase::ManagerStopped => write!(f, "manager-stopped"),
            LifecyclePhase::WorkerStarting(id) => write!(f, "worker-{}-starting", id),
            LifecyclePhase::WorkerRunning(id) => write!(f, "worker-{}-running", id),
            LifecyclePhase::WorkerStopping(id) => write!(f, "worker-{}-stopping", id),
            LifecyclePhase::WorkerStopped(id) => write!(f, "worker-{}-stopped", id),
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Event {event} is not valid in phase {phase}")]
    InvalidTransition {
        phase: LifecyclePhase,
        event: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_walk() {
        let phase = LifecyclePhase::ManagerStarting;
        let phase = phase.on_event(&LifecycleEvent::ManagerStart).unwrap();
        assert_eq!(phase, LifecyclePhase::ManagerRunning);

        let phase = phase
            .on_event(&LifecycleEvent::WorkerError {
                worker_id: 1,
                pid: 4242,
                exit_code: 255,
            })
            .unwrap();
        assert_eq!(phase, LifecyclePhase::ManagerRunning);

        let phase = phase.on_event(&LifecycleEvent::ManagerStop).unwrap();
        assert_eq!(phase, LifecyclePhase::ManagerStopping);
        assert_eq!(phase.settle(), LifecyclePhase::ManagerStopped);
    }

    #[test]
    fn test_worker_walk() {
        let phase = LifecyclePhase::WorkerStarting(2)
            .on_event(&LifecycleEvent::WorkerStart { worker_id: 2 })
            .unwrap();
        assert_eq!(phase, LifecyclePhase::WorkerRunning(2));

        let phase = phase
            .on_event(&LifecycleEvent::WorkerStop {
                worker_id: 2,
                reason: WorkerStopReason::Shutdown,
            })
            .unwrap();
        assert_eq!(phase.settle(), LifecyclePhase::WorkerStopped(2));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(LifecyclePhase::ManagerStarting
            .on_event(&LifecycleEvent::ManagerStop)
            .is_err());
        assert!(LifecyclePhase::WorkerStarting(0)
            .on_event(&LifecycleEvent::WorkerStart { worker_id: 1 })
            .is_err());
        assert!(LifecyclePhase::WorkerRunning(0)
            .on_event(&LifecycleEvent::ManagerStart)
            .is_err());
        assert!(LifecyclePhase::ManagerStopped
            .on_event(&LifecycleEvent::ManagerStop)
            .is_err());
    }
}
