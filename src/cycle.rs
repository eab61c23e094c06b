//! Reconciliation cycle: relay one batch from a source ledger to a destination
//! ledger and settle it back on the source
//!
//! A cycle reads the source's pending list, transfers a capped prefix of it on
//! the destination in one transaction, then writes that transaction's hash back
//! to the source with the records in the same order. The source only accepts
//! an ordered prefix of its own pending list, so the order read in step one is
//! carried unchanged through both calls.
//!
//! Once the destination has been mutated, any failure to settle halts the
//! direction. The next read would otherwise return the same records and they
//! would be transferred a second time.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::error::LedgerError;
use crate::ledger::LedgerClient;
use crate::metrics;
use crate::state::{CyclePermit, HaltKind, HaltReason};
use crate::types::{Direction, PendingBatch, TxRef};

/// What a cycle did
#[derive(Debug, Clone)]
pub enum CycleReport {
    /// Source had nothing pending
    Idle,
    /// Batch transferred and settled
    Settled {
        records: usize,
        /// Records left pending because of the batch cap
        deferred: usize,
        proof: TxRef,
    },
    /// Failed before anything was mutated; the next tick retries
    Failed { error: LedgerError },
    /// Direction halted for operator review
    Halted { kind: HaltKind },
}

impl CycleReport {
    /// Metric label
    pub fn outcome(&self) -> &'static str {
        match self {
            CycleReport::Idle => "idle",
            CycleReport::Settled { .. } => "settled",
            CycleReport::Failed { .. } => "failed",
            CycleReport::Halted { .. } => "halted",
        }
    }
}

struct Failure {
    error: LedgerError,
    batch: PendingBatch,
    /// Set when the direction must stop
    halt: Option<HaltKind>,
    proof: Option<TxRef>,
}

impl Failure {
    fn retry(error: LedgerError, batch: PendingBatch) -> Self {
        Self {
            error,
            batch,
            halt: None,
            proof: None,
        }
    }
}

#[derive(Clone)]
pub struct ReconciliationCycle {
    source: Arc<dyn LedgerClient>,
    destination: Arc<dyn LedgerClient>,
    direction: Direction,
    max_batch: usize,
}

impl ReconciliationCycle {
    pub fn new(
        source: Arc<dyn LedgerClient>,
        destination: Arc<dyn LedgerClient>,
        direction: Direction,
        max_batch: usize,
    ) -> Self {
        Self {
            source,
            destination,
            direction,
            max_batch: max_batch.max(1),
        }
    }

    /// Same ledgers, different cap. The fast path uses a cap of one.
    pub fn with_max_batch(&self, max_batch: usize) -> Self {
        Self {
            max_batch: max_batch.max(1),
            ..self.clone()
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Run one cycle. Never fails: every error is logged and turned into a
    /// report, and the permit is handed back as Idle or Halted.
    pub async fn run(&self, permit: CyclePermit) -> CycleReport {
        let started = Instant::now();
        let direction = self.direction.as_str();

        let report = match self.execute().await {
            Ok(report) => {
                permit.complete();
                report
            }
            Err(failure) => {
                metrics::record_error(failure.error.chain(), failure.error.kind());
                match failure.halt {
                    Some(kind) => {
                        error!(
                            direction,
                            error = %failure.error,
                            proof = ?failure.proof.map(|p| p.to_string()),
                            batch = %describe(&failure.batch),
                            "Cycle failed after the destination may have been mutated"
                        );
                        permit.halt(HaltReason::new(
                            kind,
                            failure.error.to_string(),
                            failure.batch,
                            failure.proof,
                        ));
                        CycleReport::Halted { kind }
                    }
                    None => {
                        warn!(
                            direction,
                            error = %failure.error,
                            batch = %describe(&failure.batch),
                            "Cycle failed with nothing mutated, retrying next tick"
                        );
                        permit.complete();
                        CycleReport::Failed {
                            error: failure.error,
                        }
                    }
                }
            }
        };

        metrics::record_cycle(direction, report.outcome(), started.elapsed().as_secs_f64());
        match &report {
            CycleReport::Settled { records, .. } => metrics::record_relayed(direction, *records),
            CycleReport::Idle => metrics::record_idle(direction),
            _ => {}
        }

        report
    }

    async fn execute(&self) -> Result<CycleReport, Failure> {
        let direction = self.direction.as_str();

        let backlog = self
            .source
            .pending_list()
            .await
            .map_err(|e| Failure::retry(e, PendingBatch::default()))?;
        metrics::set_pending_backlog(self.source.name(), backlog.len());

        if backlog.is_empty() {
            debug!(direction, "No pending requests");
            return Ok(CycleReport::Idle);
        }

        let batch = backlog.capped(self.max_batch);
        let deferred = backlog.len() - batch.len();
        if deferred > 0 {
            info!(
                direction,
                pending = backlog.len(),
                relaying = batch.len(),
                deferred,
                "Pending list exceeds batch cap, relaying prefix"
            );
        }

        let columns = batch.columns();
        info!(
            direction,
            source = self.source.name(),
            destination = self.destination.name(),
            records = batch.len(),
            total_amount = %batch.total_amount(),
            "Relaying batch"
        );

        let proof = match self
            .destination
            .submit_transfer(&columns.destinations, &columns.amounts)
            .await
        {
            Ok(Some(proof)) => proof,
            Ok(None) => {
                let error = LedgerError::InvalidInput {
                    chain: self.destination.name().to_string(),
                    message: format!("transfer of {} records returned no transaction", batch.len()),
                };
                return Err(Failure::retry(error, batch));
            }
            Err(error) => return Err(transfer_failure(error, batch)),
        };

        info!(
            direction,
            tx_hash = %proof,
            records = batch.len(),
            "Transfer confirmed, writing settlement"
        );

        if let Err(error) = self
            .source
            .write_settlement(&columns.origins, &columns.destinations, &columns.amounts, proof)
            .await
        {
            return Err(Failure {
                error,
                batch,
                halt: Some(HaltKind::SettlementFailed),
                proof: Some(proof),
            });
        }

        info!(
            direction,
            tx_hash = %proof,
            records = batch.len(),
            deferred,
            "Batch settled"
        );

        Ok(CycleReport::Settled {
            records: batch.len(),
            deferred,
            proof,
        })
    }
}

/// Decide whether a failed transfer stops the direction
fn transfer_failure(error: LedgerError, batch: PendingBatch) -> Failure {
    if error.possibly_applied() {
        let proof = error.unconfirmed_tx().map(TxRef);
        return Failure {
            error,
            batch,
            halt: Some(HaltKind::UnconfirmedTransfer),
            proof,
        };
    }

    if let LedgerError::Submission { class, .. } = &error {
        if class.requires_review() {
            return Failure {
                error,
                batch,
                halt: Some(HaltKind::StructuralRevert),
                proof: None,
            };
        }
    }

    Failure::retry(error, batch)
}

fn describe(batch: &PendingBatch) -> String {
    if batch.is_empty() {
        return "[]".to_string();
    }
    let records: Vec<String> = batch.records().iter().map(|r| r.to_string()).collect();
    format!("[{}]", records.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Operation, SubmissionClass};
    use crate::state::{DirectionGuard, DirectionState};
    use crate::testing::{addr, MockLedger, SettlementCall, TransferCall};
    use alloy::primitives::{Address, B256, U256};
    use std::time::Duration;

    struct Fixture {
        source: Arc<MockLedger>,
        destination: Arc<MockLedger>,
        guard: Arc<DirectionGuard>,
        cycle: ReconciliationCycle,
    }

    fn fixture(max_batch: usize) -> Fixture {
        let source = MockLedger::new("coin");
        let destination = MockLedger::new("point");
        let guard = DirectionGuard::new(Direction::CoinToPoint);
        let cycle = ReconciliationCycle::new(
            source.clone(),
            destination.clone(),
            Direction::CoinToPoint,
            max_batch,
        );
        Fixture {
            source,
            destination,
            guard,
            cycle,
        }
    }

    impl Fixture {
        async fn run(&self) -> CycleReport {
            let permit = self.guard.try_begin().expect("direction should be idle");
            self.cycle.run(permit).await
        }
    }

    const ALICE: u8 = 0xa1;
    const BOB: u8 = 0xb0;
    const CAROL: u8 = 0xc0;
    const DAVE: u8 = 0xd0;

    #[tokio::test]
    async fn test_batch_is_transferred_then_settled_in_order() {
        let f = fixture(100);
        f.source.push_request(addr(ALICE), addr(BOB), 100);
        f.source.push_request(addr(CAROL), addr(DAVE), 50);

        let report = f.run().await;

        assert_eq!(
            f.destination.transfers(),
            vec![TransferCall {
                destinations: vec![addr(BOB), addr(DAVE)],
                amounts: vec![U256::from(100), U256::from(50)],
            }]
        );

        let proof = match report {
            CycleReport::Settled {
                records,
                deferred,
                proof,
            } => {
                assert_eq!(records, 2);
                assert_eq!(deferred, 0);
                proof
            }
            other => panic!("expected settled, got {:?}", other),
        };

        assert_eq!(
            f.source.settlements(),
            vec![SettlementCall {
                origins: vec![addr(ALICE), addr(CAROL)],
                destinations: vec![addr(BOB), addr(DAVE)],
                amounts: vec![U256::from(100), U256::from(50)],
                proof,
            }]
        );
        assert_eq!(f.source.pending_len(), 0);
        assert_eq!(f.guard.snapshot(), DirectionState::Idle);
    }

    #[tokio::test]
    async fn test_empty_pending_list_makes_no_calls() {
        let f = fixture(100);

        let report = f.run().await;

        assert!(matches!(report, CycleReport::Idle));
        assert_eq!(f.source.pending_reads(), 1);
        assert!(f.destination.transfers().is_empty());
        assert!(f.source.settlements().is_empty());
        assert_eq!(f.guard.snapshot(), DirectionState::Idle);
    }

    #[tokio::test]
    async fn test_oversized_backlog_relays_prefix_only() {
        let f = fixture(2);
        for i in 1..=5u8 {
            f.source.push_request(addr(i), addr(0x10 + i), i as u64);
        }

        let report = f.run().await;
        assert!(matches!(
            report,
            CycleReport::Settled {
                records: 2,
                deferred: 3,
                ..
            }
        ));

        let settled = &f.source.settlements()[0];
        assert_eq!(settled.origins, vec![addr(1), addr(2)]);
        assert_eq!(f.source.pending_len(), 3);

        // Remainder is still a valid prefix next time round
        f.run().await;
        assert_eq!(f.source.settlements()[1].origins, vec![addr(3), addr(4)]);
        assert_eq!(f.source.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_settlement_rejected_halts_direction() {
        let f = fixture(100);
        f.source.push_request(addr(ALICE), addr(BOB), 100);
        f.source.fail_next_settlement(LedgerError::rejected(
            "coin",
            "input should be matched with pending list on the contract",
        ));

        let report = f.run().await;
        assert!(matches!(
            report,
            CycleReport::Halted {
                kind: HaltKind::SettlementFailed
            }
        ));
        assert_eq!(f.destination.transfers().len(), 1);

        match f.guard.snapshot() {
            DirectionState::Halted(reason) => {
                assert_eq!(reason.kind, HaltKind::SettlementFailed);
                assert_eq!(reason.batch.len(), 1);
                assert!(reason.proof.is_some());
            }
            other => panic!("expected halted, got {:?}", other),
        }

        // The next tick cannot start, so nothing is transferred again
        assert!(f.guard.try_begin().is_err());
        assert_eq!(f.destination.transfers().len(), 1);
        assert_eq!(f.source.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_settlement_timeout_also_halts() {
        let f = fixture(100);
        f.source.push_request(addr(ALICE), addr(BOB), 100);
        f.source.fail_next_settlement(LedgerError::timeout(
            "coin",
            Operation::WriteSettlement,
            Duration::from_secs(15),
        ));

        let report = f.run().await;
        assert!(matches!(
            report,
            CycleReport::Halted {
                kind: HaltKind::SettlementFailed
            }
        ));
    }

    #[tokio::test]
    async fn test_read_error_returns_to_idle() {
        let f = fixture(100);
        f.source.push_request(addr(ALICE), addr(BOB), 100);
        f.source
            .fail_next_read(LedgerError::read("coin", "connection refused"));

        let report = f.run().await;
        assert!(matches!(report, CycleReport::Failed { .. }));
        assert!(f.destination.transfers().is_empty());
        assert_eq!(f.guard.snapshot(), DirectionState::Idle);

        // Retried on the next tick
        assert!(matches!(f.run().await, CycleReport::Settled { .. }));
    }

    #[tokio::test]
    async fn test_transient_submission_error_returns_to_idle() {
        let f = fixture(100);
        f.source.push_request(addr(ALICE), addr(BOB), 100);
        f.destination.fail_next_transfer(LedgerError::submission(
            "point",
            SubmissionClass::StaleNonce,
            "nonce too low",
        ));

        let report = f.run().await;
        assert!(matches!(report, CycleReport::Failed { .. }));
        assert!(f.source.settlements().is_empty());
        assert_eq!(f.guard.snapshot(), DirectionState::Idle);
    }

    #[tokio::test]
    async fn test_structural_revert_halts_for_review() {
        let f = fixture(100);
        f.source.push_request(addr(ALICE), Address::ZERO, 100);
        f.destination.fail_next_transfer(LedgerError::submission(
            "point",
            SubmissionClass::Structural,
            "execution reverted: target address cannot be zero",
        ));

        let report = f.run().await;
        assert!(matches!(
            report,
            CycleReport::Halted {
                kind: HaltKind::StructuralRevert
            }
        ));
        assert!(f.source.settlements().is_empty());
    }

    #[tokio::test]
    async fn test_unconfirmed_transfer_halts_with_tx_hash() {
        let f = fixture(100);
        f.source.push_request(addr(ALICE), addr(BOB), 100);
        let hash = B256::repeat_byte(0x42);
        f.destination.fail_next_transfer(LedgerError::unconfirmed(
            "point",
            Operation::SubmitTransfer,
            hash,
            "no receipt after 120s",
        ));

        let report = f.run().await;
        assert!(matches!(
            report,
            CycleReport::Halted {
                kind: HaltKind::UnconfirmedTransfer
            }
        ));
        match f.guard.snapshot() {
            DirectionState::Halted(reason) => assert_eq!(reason.proof, Some(TxRef(hash))),
            other => panic!("expected halted, got {:?}", other),
        }
        assert!(f.source.settlements().is_empty());
    }

    #[tokio::test]
    async fn test_resume_lets_next_cycle_run() {
        let f = fixture(100);
        f.source.push_request(addr(ALICE), addr(BOB), 100);
        f.source.fail_next_settlement(LedgerError::read("coin", "connection reset"));
        f.run().await;
        assert!(f.guard.is_halted());

        // Operator settles the batch by hand, then clears the halt
        let transfer = &f.destination.transfers()[0];
        let proof = TxRef(B256::repeat_byte(0x01));
        f.source
            .write_settlement(&[addr(ALICE)], &transfer.destinations, &transfer.amounts, proof)
            .await
            .unwrap();
        f.guard.resume();

        assert!(matches!(f.run().await, CycleReport::Idle));
        assert_eq!(f.destination.transfers().len(), 1);
    }

    #[tokio::test]
    async fn test_fast_path_cap_settles_head_only() {
        let f = fixture(100);
        f.source.push_request(addr(ALICE), addr(BOB), 100);
        f.source.push_request(addr(CAROL), addr(DAVE), 50);

        let single = f.cycle.with_max_batch(1);
        let permit = f.guard.try_begin().unwrap();
        let report = single.run(permit).await;

        assert!(matches!(
            report,
            CycleReport::Settled {
                records: 1,
                deferred: 1,
                ..
            }
        ));
        assert_eq!(f.source.settlements()[0].origins, vec![addr(ALICE)]);
        assert_eq!(f.source.pending_len(), 1);
    }
}
