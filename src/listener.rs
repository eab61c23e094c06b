//! Fast path: react to "request recorded" notifications between ticks
//!
//! A [`NotificationSource`] follows a ledger's `RequestRecorded` events and
//! publishes each one on a channel. A single [`FastPath`] consumer per
//! direction reads the channel and runs the ordinary reconciliation cycle
//! capped to one record, taking the same direction guard as the scheduled
//! cycle. The origin ledger only settles a prefix of its pending list, so the
//! record relayed is the head of that list, not necessarily the one notified.
//!
//! Nothing here is needed for correctness. A notice that arrives while the
//! direction is busy or halted is dropped and left to the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::cycle::{CycleReport, ReconciliationCycle};
use crate::error::LedgerError;
use crate::ledger::{RequestFeed, RequestNotice};
use crate::metrics;
use crate::retry::RetryConfig;
use crate::state::DirectionGuard;
use crate::types::Direction;

/// Notices buffered between source and consumer
const CHANNEL_CAPACITY: usize = 64;

/// Largest block range requested in one log query
const MAX_BLOCK_RANGE: u64 = 1_000;

pub struct NotificationSource {
    feed: Arc<dyn RequestFeed>,
    direction: Direction,
    poll_interval: Duration,
    retry: RetryConfig,
}

impl NotificationSource {
    pub fn new(feed: Arc<dyn RequestFeed>, direction: Direction, poll_interval: Duration) -> Self {
        Self {
            feed,
            direction,
            poll_interval,
            retry: RetryConfig::default(),
        }
    }

    /// Publish notices until shutdown or until the consumer goes away.
    /// Stream errors keep the cursor and retry after a backoff.
    pub async fn run(self, tx: mpsc::Sender<RequestNotice>, mut shutdown: watch::Receiver<bool>) {
        let direction = self.direction;
        let chain = self.feed.name().to_string();
        // Next block to scan; set from the head on the first successful poll
        let mut cursor: Option<u64> = None;
        let mut failures: u32 = 0;

        loop {
            let delay = match self.poll(&mut cursor, &tx).await {
                Ok(true) => {
                    if failures > 0 {
                        info!(%direction, chain = %chain, "Notification stream re-established");
                    }
                    failures = 0;
                    self.poll_interval
                }
                Ok(false) => {
                    debug!(%direction, "Fast path consumer gone, stopping notification source");
                    return;
                }
                Err(e) => {
                    let backoff = self.retry.backoff_for_attempt(failures);
                    failures = failures.saturating_add(1);
                    metrics::record_error(e.chain(), e.kind());
                    warn!(
                        %direction,
                        chain = %chain,
                        error = %e,
                        attempt = failures,
                        backoff_ms = backoff.as_millis() as u64,
                        "Notification stream error, reconnecting"
                    );
                    backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    debug!(%direction, "Notification source stopped");
                    return;
                }
            }
        }
    }

    /// One poll. `Ok(false)` means the channel is closed.
    async fn poll(
        &self,
        cursor: &mut Option<u64>,
        tx: &mpsc::Sender<RequestNotice>,
    ) -> Result<bool, LedgerError> {
        let head = self.feed.latest_block().await?;

        let from = match *cursor {
            Some(from) => from,
            None => {
                debug!(direction = %self.direction, head, "Following request notifications from head");
                *cursor = Some(head + 1);
                return Ok(true);
            }
        };
        if head < from {
            return Ok(true);
        }

        let to = head.min(from + MAX_BLOCK_RANGE - 1);
        let notices = self.feed.request_events(from, to).await?;
        *cursor = Some(to + 1);

        for notice in notices {
            debug!(
                direction = %self.direction,
                origin = %notice.origin_account,
                destination = %notice.destination_account,
                amount = %notice.amount,
                block = notice.block_number,
                "Request recorded"
            );
            match tx.try_send(notice) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    metrics::record_fast_path(self.direction.as_str(), "overflow");
                    debug!(direction = %self.direction, "Fast path backlog full, leaving notice to the scheduled cycle");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return Ok(false),
            }
        }

        Ok(true)
    }
}

/// Single consumer for one direction's notices
pub struct FastPath {
    cycle: ReconciliationCycle,
    guard: Arc<DirectionGuard>,
}

impl FastPath {
    pub fn new(cycle: &ReconciliationCycle, guard: Arc<DirectionGuard>) -> Self {
        Self {
            cycle: cycle.with_max_batch(1),
            guard,
        }
    }

    /// Handle notices until the channel closes
    pub async fn run(self, mut rx: mpsc::Receiver<RequestNotice>) {
        while let Some(notice) = rx.recv().await {
            self.handle(notice).await;
        }
        debug!(direction = %self.cycle.direction(), "Fast path stopped");
    }

    /// Run a single-record cycle if the direction is free
    pub async fn handle(&self, notice: RequestNotice) -> Option<CycleReport> {
        let direction = self.cycle.direction();
        match self.guard.try_begin() {
            Ok(permit) => {
                metrics::record_fast_path(direction.as_str(), "triggered");
                debug!(
                    %direction,
                    origin = %notice.origin_account,
                    "Fast path reconciling head of pending list"
                );
                Some(self.cycle.run(permit).await)
            }
            Err(busy) => {
                metrics::record_fast_path(direction.as_str(), "dropped");
                debug!(%direction, ?busy, "Direction busy, leaving notice to the scheduled cycle");
                None
            }
        }
    }
}

/// Wire a notification source to its consumer and run both until shutdown
pub async fn run_fast_path(
    feed: Arc<dyn RequestFeed>,
    cycle: &ReconciliationCycle,
    guard: Arc<DirectionGuard>,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
) {
    let direction = cycle.direction();
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let source = NotificationSource::new(feed, direction, poll_interval);
    let consumer = FastPath::new(cycle, guard);

    info!(%direction, poll_ms = poll_interval.as_millis() as u64, "Fast path started");
    // The source owns the only sender, so the consumer ends once it stops
    tokio::join!(source.run(tx, shutdown), consumer.run(rx));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DirectionState, HaltKind, HaltReason};
    use crate::testing::{addr, MockLedger};
    use crate::types::PendingBatch;
    use alloy::primitives::U256;
    use tokio::time::Instant;

    struct Running {
        coin: Arc<MockLedger>,
        point: Arc<MockLedger>,
        guard: Arc<DirectionGuard>,
        shutdown: watch::Sender<bool>,
        handle: tokio::task::JoinHandle<()>,
    }

    fn start(guard: Arc<DirectionGuard>) -> Running {
        let coin = MockLedger::new("coin");
        let point = MockLedger::new("point");
        coin.set_head(10);
        let cycle = ReconciliationCycle::new(coin.clone(), point.clone(), Direction::CoinToPoint, 100);
        let (shutdown, rx) = watch::channel(false);
        let feed: Arc<dyn RequestFeed> = coin.clone();
        let fast_guard = guard.clone();
        let handle = tokio::spawn(async move {
            run_fast_path(feed, &cycle, fast_guard, Duration::from_secs(2), rx).await
        });
        Running {
            coin,
            point,
            guard,
            shutdown,
            handle,
        }
    }

    async fn at(seconds: u64, origin: Instant) {
        tokio::time::sleep_until(origin + Duration::from_secs(seconds)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_notice_triggers_single_record_cycle() {
        let origin = Instant::now();
        let r = start(DirectionGuard::new(Direction::CoinToPoint));

        at(3, origin).await;
        r.coin.record_request(addr(0xa1), addr(0xb0), 100, 11);

        at(5, origin).await;
        let transfers = r.point.transfers();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].destinations, vec![addr(0xb0)]);
        assert_eq!(transfers[0].amounts, vec![U256::from(100)]);
        assert_eq!(r.coin.settlements().len(), 1);
        assert_eq!(r.coin.pending_len(), 0);
        assert_eq!(r.guard.snapshot(), DirectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notice_relays_head_of_pending_list() {
        let origin = Instant::now();
        let r = start(DirectionGuard::new(Direction::CoinToPoint));
        // Recorded before the stream started, so never notified
        r.coin.push_request(addr(0x01), addr(0x02), 7);

        at(3, origin).await;
        r.coin.record_request(addr(0xa1), addr(0xb0), 100, 11);

        at(5, origin).await;
        assert_eq!(r.coin.settlements()[0].origins, vec![addr(0x01)]);
        assert_eq!(r.coin.pending_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_direction_drops_notice() {
        let origin = Instant::now();
        let guard = DirectionGuard::new(Direction::CoinToPoint);
        let scheduled = guard.try_begin().unwrap();
        let r = start(guard);

        at(3, origin).await;
        r.coin.record_request(addr(0xa1), addr(0xb0), 100, 11);

        at(5, origin).await;
        assert!(r.point.transfers().is_empty());
        assert_eq!(r.coin.pending_len(), 1);
        assert_eq!(r.coin.event_queries(), 1);

        scheduled.complete();
    }

    #[tokio::test]
    async fn test_halted_direction_is_not_touched() {
        let coin = MockLedger::new("coin");
        let point = MockLedger::new("point");
        coin.push_request(addr(0xa1), addr(0xb0), 100);
        let guard = DirectionGuard::new(Direction::CoinToPoint);
        guard.try_begin().unwrap().halt(HaltReason::new(
            HaltKind::SettlementFailed,
            "rejected",
            PendingBatch::default(),
            None,
        ));

        let cycle = ReconciliationCycle::new(coin.clone(), point.clone(), Direction::CoinToPoint, 100);
        let fast = FastPath::new(&cycle, guard.clone());
        let notice = RequestNotice {
            origin_account: addr(0xa1),
            destination_account: addr(0xb0),
            amount: U256::from(100),
            block_number: 1,
        };

        assert!(fast.handle(notice).await.is_none());
        assert_eq!(coin.pending_reads(), 0);
        assert!(guard.is_halted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_errors_reconnect_with_backoff() {
        let origin = Instant::now();
        let r = start(DirectionGuard::new(Direction::CoinToPoint));
        // Fails at 0s and 2s, backs off 2s then 4s, succeeds at 6s
        r.coin.fail_feed(2);

        at(7, origin).await;
        r.coin.record_request(addr(0xa1), addr(0xb0), 100, 11);

        at(9, origin).await;
        assert_eq!(r.point.transfers().len(), 1);
        assert_eq!(r.coin.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_source_and_consumer() {
        let r = start(DirectionGuard::new(Direction::CoinToPoint));
        tokio::time::sleep(Duration::from_secs(1)).await;

        r.shutdown.send(true).unwrap();
        r.handle.await.unwrap();
        assert_eq!(r.guard.snapshot(), DirectionState::Idle);
    }
}
