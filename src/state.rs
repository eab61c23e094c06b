//! Per-direction state: Idle, InFlight or Halted
//!
//! The relay owns one [`DirectionGuard`] per direction. The scheduled cycle
//! and the fast path for the same direction both go through it, so at most
//! one cycle per direction is ever in flight. A cycle receives a
//! [`CyclePermit`] and must hand it back with its outcome.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::metrics;
use crate::types::{Direction, PendingBatch, TxRef};

/// Why a direction stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltKind {
    /// Destination was mutated but writing the proof back failed
    SettlementFailed,
    /// Transfer was broadcast but never confirmed within the bound
    UnconfirmedTransfer,
    /// Destination reverted for a structural reason
    StructuralRevert,
    /// A cycle ended without reporting an outcome
    Aborted,
}

impl HaltKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HaltKind::SettlementFailed => "settlement_failed",
            HaltKind::UnconfirmedTransfer => "unconfirmed_transfer",
            HaltKind::StructuralRevert => "structural_revert",
            HaltKind::Aborted => "aborted",
        }
    }
}

/// Everything an operator needs to reconcile a halted direction by hand
#[derive(Debug, Clone, PartialEq)]
pub struct HaltReason {
    pub kind: HaltKind,
    pub detail: String,
    /// Batch that was being relayed
    pub batch: PendingBatch,
    /// Destination transaction, when one exists
    pub proof: Option<TxRef>,
    pub since: DateTime<Utc>,
}

impl HaltReason {
    pub fn new(
        kind: HaltKind,
        detail: impl Into<String>,
        batch: PendingBatch,
        proof: Option<TxRef>,
    ) -> Self {
        Self {
            kind,
            detail: detail.into(),
            batch,
            proof,
            since: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DirectionState {
    Idle,
    InFlight,
    Halted(HaltReason),
}

impl DirectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DirectionState::Idle => "idle",
            DirectionState::InFlight => "in_flight",
            DirectionState::Halted(_) => "halted",
        }
    }

    /// Gauge value: 0 idle, 1 in flight, 2 halted
    fn gauge_value(&self) -> i64 {
        match self {
            DirectionState::Idle => 0,
            DirectionState::InFlight => 1,
            DirectionState::Halted(_) => 2,
        }
    }
}

/// Returned when a permit cannot be taken
#[derive(Debug, Clone, PartialEq)]
pub enum Busy {
    InFlight,
    Halted(HaltKind),
}

/// Owner of one direction's state
#[derive(Debug)]
pub struct DirectionGuard {
    direction: Direction,
    state: Mutex<DirectionState>,
}

impl DirectionGuard {
    pub fn new(direction: Direction) -> Arc<Self> {
        metrics::set_direction_state(direction.as_str(), DirectionState::Idle.gauge_value());
        Arc::new(Self {
            direction,
            state: Mutex::new(DirectionState::Idle),
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn lock(&self) -> MutexGuard<'_, DirectionState> {
        // State is a plain enum; a poisoned lock still holds a valid value
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, state: &mut DirectionState, next: DirectionState) {
        metrics::set_direction_state(self.direction.as_str(), next.gauge_value());
        *state = next;
    }

    /// Move Idle -> InFlight, or report why not
    pub fn try_begin(self: &Arc<Self>) -> Result<CyclePermit, Busy> {
        let mut state = self.lock();
        match &*state {
            DirectionState::Idle => {
                self.set(&mut state, DirectionState::InFlight);
                Ok(CyclePermit {
                    guard: Arc::clone(self),
                    finished: false,
                })
            }
            DirectionState::InFlight => Err(Busy::InFlight),
            DirectionState::Halted(reason) => Err(Busy::Halted(reason.kind)),
        }
    }

    pub fn snapshot(&self) -> DirectionState {
        self.lock().clone()
    }

    pub fn is_halted(&self) -> bool {
        matches!(*self.lock(), DirectionState::Halted(_))
    }

    /// Operator action: clear a halt. Returns the reason that was cleared, or
    /// `None` when the direction was not halted.
    pub fn resume(&self) -> Option<HaltReason> {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, DirectionState::Idle) {
            DirectionState::Halted(reason) => {
                self.set(&mut state, DirectionState::Idle);
                info!(
                    direction = %self.direction,
                    kind = reason.kind.as_str(),
                    records = reason.batch.len(),
                    "Halt cleared by operator"
                );
                Some(reason)
            }
            other => {
                *state = other;
                None
            }
        }
    }

    fn finish(&self, next: DirectionState) {
        let mut state = self.lock();
        self.set(&mut state, next);
    }
}

/// Proof that the holder is the only cycle in flight for a direction
#[derive(Debug)]
pub struct CyclePermit {
    guard: Arc<DirectionGuard>,
    finished: bool,
}

impl CyclePermit {
    pub fn direction(&self) -> Direction {
        self.guard.direction
    }

    /// Cycle ended without leaving anything half-done
    pub fn complete(mut self) {
        self.finished = true;
        self.guard.finish(DirectionState::Idle);
    }

    /// Cycle left the ledgers in a state the relay must not paper over
    pub fn halt(mut self, reason: HaltReason) {
        self.finished = true;
        error!(
            direction = %self.guard.direction,
            kind = reason.kind.as_str(),
            detail = %reason.detail,
            proof = ?reason.proof.map(|p| p.to_string()),
            records = reason.batch.len(),
            "Direction HALTED - operator action required before further relaying"
        );
        self.guard.finish(DirectionState::Halted(reason));
    }
}

impl Drop for CyclePermit {
    fn drop(&mut self) {
        if !self.finished {
            // The cycle may have dispatched a mutation before it went away
            self.guard.finish(DirectionState::Halted(HaltReason::new(
                HaltKind::Aborted,
                "cycle ended without reporting an outcome",
                PendingBatch::default(),
                None,
            )));
        }
    }
}
