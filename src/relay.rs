//! Two-direction scheduler
//!
//! Each direction ticks on its own interval. Point-to-coin starts half a
//! period after coin-to-point so the two directions do not hit the same
//! ledgers and accounts at the same moment. A tick that finds its direction
//! busy or halted is dropped, never queued.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::cycle::{CycleReport, ReconciliationCycle};
use crate::ledger::LedgerClient;
use crate::state::{Busy, DirectionGuard};
use crate::types::Direction;

/// State guards for both directions, shared with the fast path and the API
#[derive(Debug, Clone)]
pub struct DirectionGuards {
    coin_to_point: Arc<DirectionGuard>,
    point_to_coin: Arc<DirectionGuard>,
}

impl DirectionGuards {
    pub fn new() -> Self {
        Self {
            coin_to_point: DirectionGuard::new(Direction::CoinToPoint),
            point_to_coin: DirectionGuard::new(Direction::PointToCoin),
        }
    }

    pub fn get(&self, direction: Direction) -> &Arc<DirectionGuard> {
        match direction {
            Direction::CoinToPoint => &self.coin_to_point,
            Direction::PointToCoin => &self.point_to_coin,
        }
    }
}

impl Default for DirectionGuards {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Relay {
    coin_to_point: ReconciliationCycle,
    point_to_coin: ReconciliationCycle,
    guards: DirectionGuards,
    period: Duration,
}

impl Relay {
    pub fn new(
        coin: Arc<dyn LedgerClient>,
        point: Arc<dyn LedgerClient>,
        config: &RelayConfig,
    ) -> Self {
        Self {
            coin_to_point: ReconciliationCycle::new(
                coin.clone(),
                point.clone(),
                Direction::CoinToPoint,
                config.max_batch_size,
            ),
            point_to_coin: ReconciliationCycle::new(
                point,
                coin,
                Direction::PointToCoin,
                config.max_batch_size,
            ),
            guards: DirectionGuards::new(),
            period: config.polling_interval(),
        }
    }

    pub fn guards(&self) -> DirectionGuards {
        self.guards.clone()
    }

    pub fn cycle(&self, direction: Direction) -> &ReconciliationCycle {
        match direction {
            Direction::CoinToPoint => &self.coin_to_point,
            Direction::PointToCoin => &self.point_to_coin,
        }
    }

    /// Tick both directions until `shutdown` flips, then wait for any cycle
    /// still in flight.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let start = Instant::now();
        let offset = self.period / 2;

        info!(
            period_ms = self.period.as_millis() as u64,
            offset_ms = offset.as_millis() as u64,
            "Relay started"
        );

        tokio::join!(
            run_direction(
                self.coin_to_point.clone(),
                self.guards.get(Direction::CoinToPoint).clone(),
                start,
                self.period,
                shutdown.clone(),
            ),
            run_direction(
                self.point_to_coin.clone(),
                self.guards.get(Direction::PointToCoin).clone(),
                start + offset,
                self.period,
                shutdown,
            ),
        );

        info!("Relay stopped");
    }
}

async fn run_direction(
    cycle: ReconciliationCycle,
    guard: Arc<DirectionGuard>,
    start: Instant,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let direction = cycle.direction();
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: JoinSet<CycleReport> = JoinSet::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match guard.try_begin() {
                    Ok(permit) => {
                        let cycle = cycle.clone();
                        in_flight.spawn(async move { cycle.run(permit).await });
                    }
                    Err(Busy::InFlight) => {
                        debug!(%direction, "Previous cycle still in flight, skipping tick");
                    }
                    Err(Busy::Halted(kind)) => {
                        warn!(
                            %direction,
                            kind = kind.as_str(),
                            "Direction halted, skipping tick until resumed"
                        );
                    }
                }
            }
            Some(joined) = in_flight.join_next() => {
                log_joined(direction, joined);
            }
            _ = shutdown.changed() => {
                break;
            }
        }
    }

    if !in_flight.is_empty() {
        info!(%direction, "Waiting for in-flight cycle before stopping");
    }
    while let Some(joined) = in_flight.join_next().await {
        log_joined(direction, joined);
    }
    debug!(%direction, "Direction stopped");
}

fn log_joined(direction: Direction, joined: Result<CycleReport, tokio::task::JoinError>) {
    match joined {
        Ok(report) => debug!(%direction, outcome = report.outcome(), "Cycle finished"),
        // The permit was dropped during unwind, which halts the direction
        Err(e) => error!(%direction, error = %e, "Cycle task panicked"),
    }
}
