//! Protective action executor.
//!
//! Runs the ordered action list for a crisis transition sequentially with
//! partial-failure semantics: an individual gateway failure is retried once,
//! recorded, alerted, and the list continues. Emergency actions are rate
//! limited (rolling 24 h cap plus a cooldown between transitions) so noisy
//! inputs cannot drive runaway liquidation.

use chrono::{DateTime, Duration, Utc};
use risk_core::alerts::{AlertBook, AlertKind, AlertSeverity};
use risk_core::config::{HedgeConfig, RateLimitConfig};
use risk_core::traits::{ExecutionGateway, HedgeInstrumentResolver};
use risk_core::types::{
    ActionOutcome, Position, ProtectiveAction, ProtectiveActionRecord,
};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::hedge;

/// Latch suspending new position openings until an expiry instant, stored
/// as a unix timestamp (0 when clear). The sizing advisor checks it before
/// approving any candidate.
#[derive(Debug, Default)]
pub struct TradingSuspension {
    until_unix: AtomicI64,
}

impl TradingSuspension {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suspend_for(&self, minutes: i64) {
        let until = Utc::now() + Duration::minutes(minutes);
        self.until_unix.store(until.timestamp(), AtomicOrdering::SeqCst);
        warn!(until = %until, "Trading suspended");
    }

    pub fn is_suspended(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() < self.until_unix.load(AtomicOrdering::SeqCst)
    }

    pub fn lift(&self) {
        self.until_unix.store(0, AtomicOrdering::SeqCst);
        info!("Trading suspension lifted");
    }
}

/// Rolling-window throttle for emergency actions.
///
/// The 24 h cap counts every emergency action; the cooldown applies between
/// transitions, so one transition's ordered list never blocks itself.
#[derive(Debug)]
pub struct ActionRateLimiter {
    config: RateLimitConfig,
    history: VecDeque<DateTime<Utc>>,
}

impl ActionRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, history: VecDeque::new() }
    }

    /// Cooldown gate checked once per transition batch.
    pub fn check_cooldown(&mut self, now: DateTime<Utc>) -> Result<(), String> {
        self.prune(now);
        if let Some(&last) = self.history.back() {
            let elapsed = now - last;
            let cooldown = Duration::minutes(self.config.cooldown_minutes);
            if elapsed < cooldown {
                return Err(format!(
                    "cooldown: {}s since last emergency action, need {}s",
                    elapsed.num_seconds(),
                    cooldown.num_seconds()
                ));
            }
        }
        Ok(())
    }

    /// Count one emergency action against the rolling 24 h cap.
    pub fn try_count(&mut self, now: DateTime<Utc>) -> Result<(), String> {
        self.prune(now);
        if self.history.len() as u32 >= self.config.max_actions_per_day {
            return Err(format!(
                "daily cap: {} emergency actions in the last 24h",
                self.history.len()
            ));
        }
        self.history.push_back(now);
        Ok(())
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = now - Duration::hours(24);
        while self.history.front().map(|&t| t < horizon).unwrap_or(false) {
            self.history.pop_front();
        }
    }
}

/// Translates crisis-level transitions into ordered remedial actions
/// against the execution gateway.
pub struct ProtectiveActionExecutor {
    gateway: Arc<dyn ExecutionGateway>,
    resolver: Arc<dyn HedgeInstrumentResolver>,
    alerts: Arc<AlertBook>,
    hedge_config: HedgeConfig,
    limiter: Mutex<ActionRateLimiter>,
    suspension: Arc<TradingSuspension>,
    /// Append-only audit trail; retention pruning is external to the core.
    records: RwLock<Vec<ProtectiveActionRecord>>,
    /// Actions that did not fully succeed, queued for re-attempt on later
    /// cycles while the crisis level holds.
    unresolved: Mutex<Vec<(ProtectiveAction, String)>>,
}

impl ProtectiveActionExecutor {
    pub fn new(
        gateway: Arc<dyn ExecutionGateway>,
        resolver: Arc<dyn HedgeInstrumentResolver>,
        alerts: Arc<AlertBook>,
        hedge_config: HedgeConfig,
        rate_limit: RateLimitConfig,
    ) -> Self {
        Self {
            gateway,
            resolver,
            alerts,
            hedge_config,
            limiter: Mutex::new(ActionRateLimiter::new(rate_limit)),
            suspension: Arc::new(TradingSuspension::new()),
            records: RwLock::new(Vec::new()),
            unresolved: Mutex::new(Vec::new()),
        }
    }

    pub fn suspension(&self) -> Arc<TradingSuspension> {
        Arc::clone(&self.suspension)
    }

    /// Snapshot of the audit trail.
    pub async fn records(&self) -> Vec<ProtectiveActionRecord> {
        self.records.read().await.clone()
    }

    /// Execute a transition's ordered action list sequentially, continuing
    /// past individual failures. Every action produces exactly one record.
    pub async fn execute_transition(
        &self,
        actions: &[ProtectiveAction],
        trigger_reason: &str,
        equity: Decimal,
    ) -> Vec<ProtectiveActionRecord> {
        // A new transition's list supersedes whatever the old level left
        // unresolved.
        self.unresolved.lock().await.clear();

        let now = Utc::now();
        let cooldown_block = if actions.iter().any(ProtectiveAction::is_emergency) {
            self.limiter.lock().await.check_cooldown(now).err()
        } else {
            None
        };

        let mut executed = Vec::with_capacity(actions.len());
        for action in actions {
            let record = if action.is_emergency() {
                if let Some(block) = &cooldown_block {
                    self.skip_rate_limited(action, trigger_reason, block).await
                } else {
                    match self.limiter.lock().await.try_count(Utc::now()) {
                        Ok(()) => self.execute_action(action, trigger_reason, equity).await,
                        Err(block) => self.skip_rate_limited(action, trigger_reason, &block).await,
                    }
                }
            } else {
                self.execute_action(action, trigger_reason, equity).await
            };

            self.finish_action(record.clone(), action, trigger_reason).await;
            executed.push(record);
        }
        executed
    }

    /// Re-attempt every action that did not fully succeed earlier, while the
    /// crisis level that demanded it still holds. A retry continues the
    /// original episode, so the cooldown does not apply; the rolling 24 h
    /// cap still does.
    pub async fn retry_unresolved(&self, equity: Decimal) -> Vec<ProtectiveActionRecord> {
        let pending = std::mem::take(&mut *self.unresolved.lock().await);
        if pending.is_empty() {
            return Vec::new();
        }

        let mut executed = Vec::with_capacity(pending.len());
        for (action, reason) in pending {
            info!(action = action.name(), "Re-attempting unresolved protective action");
            let record = if action.is_emergency() {
                match self.limiter.lock().await.try_count(Utc::now()) {
                    Ok(()) => self.execute_action(&action, &reason, equity).await,
                    Err(block) => self.skip_rate_limited(&action, &reason, &block).await,
                }
            } else {
                self.execute_action(&action, &reason, equity).await
            };

            self.finish_action(record.clone(), &action, &reason).await;
            executed.push(record);
        }
        executed
    }

    /// Whether any action is still queued for re-attempt.
    pub async fn has_unresolved(&self) -> bool {
        !self.unresolved.lock().await.is_empty()
    }

    // Alert on failure, queue anything short of full success for the next
    // cycle, and append to the audit trail.
    async fn finish_action(
        &self,
        record: ProtectiveActionRecord,
        action: &ProtectiveAction,
        reason: &str,
    ) {
        if matches!(record.outcome, ActionOutcome::Partial | ActionOutcome::Failed) {
            self.alerts.raise(
                AlertKind::ActionFailure,
                Some(record.action.name().to_string()),
                AlertSeverity::Critical,
                record
                    .detail
                    .clone()
                    .unwrap_or_else(|| format!("{} did not fully succeed", record.action.name())),
            );
        }
        if record.outcome != ActionOutcome::Success {
            self.unresolved
                .lock()
                .await
                .push((action.clone(), reason.to_string()));
        }
        self.records.write().await.push(record);
    }

    async fn execute_action(
        &self,
        action: &ProtectiveAction,
        reason: &str,
        equity: Decimal,
    ) -> ProtectiveActionRecord {
        info!(action = action.name(), reason = %reason, "Executing protective action");
        match action {
            ProtectiveAction::Alert => {
                self.alerts.raise(
                    AlertKind::CrisisTransition,
                    None,
                    AlertSeverity::Warning,
                    reason.to_string(),
                );
                ProtectiveActionRecord::new(action.clone(), reason, ActionOutcome::Success, vec![])
            }
            ProtectiveAction::TightenStops => {
                // Stop mechanics live outside the core; signal the stop layer.
                self.alerts.raise(
                    AlertKind::StopTightening,
                    None,
                    AlertSeverity::Warning,
                    format!("tighten stops: {reason}"),
                );
                ProtectiveActionRecord::new(action.clone(), reason, ActionOutcome::Success, vec![])
            }
            ProtectiveAction::CloseAll => {
                self.close_positions(action, reason, |_| true).await
            }
            ProtectiveAction::CloseLosingOnly => {
                self.close_positions(action, reason, Position::is_losing).await
            }
            ProtectiveAction::ReduceSizes { fraction } => {
                self.reduce_positions(action, reason, *fraction).await
            }
            ProtectiveAction::EmergencyHedge => self.emergency_hedge(action, reason, equity).await,
            ProtectiveAction::RestrictTrading { minutes } => {
                self.suspension.suspend_for(*minutes);
                ProtectiveActionRecord::new(action.clone(), reason, ActionOutcome::Success, vec![])
            }
        }
    }

    async fn skip_rate_limited(
        &self,
        action: &ProtectiveAction,
        reason: &str,
        block: &str,
    ) -> ProtectiveActionRecord {
        warn!(action = action.name(), block = %block, "Emergency action rate limited");
        self.alerts.raise(
            AlertKind::ActionRateLimited,
            Some(action.name().to_string()),
            AlertSeverity::Critical,
            format!("{} suppressed ({block})", action.name()),
        );
        ProtectiveActionRecord::new(action.clone(), reason, ActionOutcome::Skipped, vec![])
            .with_detail(block.to_string())
    }

    async fn close_positions(
        &self,
        action: &ProtectiveAction,
        reason: &str,
        filter: impl Fn(&Position) -> bool,
    ) -> ProtectiveActionRecord {
        let positions = match self.gateway.list_open_positions().await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "Could not list positions");
                return ProtectiveActionRecord::new(
                    action.clone(),
                    reason,
                    ActionOutcome::Failed,
                    vec![],
                )
                .with_detail(e.to_string());
            }
        };
        let targets: Vec<&Position> = positions.iter().filter(|p| filter(p)).collect();

        // Closing nothing succeeds trivially.
        let mut affected = Vec::with_capacity(targets.len());
        let mut failures = Vec::new();
        for position in targets {
            if self.close_with_retry(position.id).await {
                affected.push(position.id);
            } else {
                failures.push(position.id);
            }
        }
        finish_record(action, reason, affected, failures)
    }

    async fn reduce_positions(
        &self,
        action: &ProtectiveAction,
        reason: &str,
        fraction: Decimal,
    ) -> ProtectiveActionRecord {
        let positions = match self.gateway.list_open_positions().await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "Could not list positions");
                return ProtectiveActionRecord::new(
                    action.clone(),
                    reason,
                    ActionOutcome::Failed,
                    vec![],
                )
                .with_detail(e.to_string());
            }
        };

        let mut affected = Vec::with_capacity(positions.len());
        let mut failures = Vec::new();
        for position in &positions {
            if self.reduce_with_retry(position.id, fraction).await {
                affected.push(position.id);
            } else {
                failures.push(position.id);
            }
        }
        finish_record(action, reason, affected, failures)
    }

    async fn emergency_hedge(
        &self,
        action: &ProtectiveAction,
        reason: &str,
        equity: Decimal,
    ) -> ProtectiveActionRecord {
        let positions = match self.gateway.list_open_positions().await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "Could not list positions");
                return ProtectiveActionRecord::new(
                    action.clone(),
                    reason,
                    ActionOutcome::Failed,
                    vec![],
                )
                .with_detail(e.to_string());
            }
        };

        let plans = hedge::plan_hedges(
            &positions,
            equity,
            self.hedge_config.trigger_equity_fraction,
            self.resolver.as_ref(),
        );

        // Each hedge attempt is independent of the others.
        let mut affected = Vec::with_capacity(plans.len());
        let mut failed = 0usize;
        for plan in &plans {
            match self
                .open_with_retry(&plan.instrument, plan.direction, plan.size)
                .await
            {
                Some(id) => affected.push(id),
                None => failed += 1,
            }
        }

        let outcome = if failed == 0 {
            ActionOutcome::Success
        } else if affected.is_empty() {
            ActionOutcome::Failed
        } else {
            ActionOutcome::Partial
        };
        let mut record = ProtectiveActionRecord::new(action.clone(), reason, outcome, affected);
        if failed > 0 {
            record = record.with_detail(format!("{failed} hedge attempt(s) failed"));
        }
        record
    }

    async fn close_with_retry(&self, id: Uuid) -> bool {
        for attempt in 0..2 {
            match self.gateway.close_position(id).await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(position_id = %id, attempt, error = %e, "Close failed");
                }
            }
        }
        false
    }

    async fn reduce_with_retry(&self, id: Uuid, fraction: Decimal) -> bool {
        for attempt in 0..2 {
            match self.gateway.reduce_position(id, fraction).await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(position_id = %id, attempt, error = %e, "Reduce failed");
                }
            }
        }
        false
    }

    async fn open_with_retry(
        &self,
        instrument: &str,
        direction: risk_core::types::Direction,
        size: Decimal,
    ) -> Option<Uuid> {
        for attempt in 0..2 {
            match self.gateway.open_position(instrument, direction, size).await {
                Ok(id) => return Some(id),
                Err(e) => {
                    warn!(instrument, attempt, error = %e, "Hedge open failed");
                }
            }
        }
        None
    }
}

fn finish_record(
    action: &ProtectiveAction,
    reason: &str,
    affected: Vec<Uuid>,
    failures: Vec<Uuid>,
) -> ProtectiveActionRecord {
    let outcome = if failures.is_empty() {
        ActionOutcome::Success
    } else if affected.is_empty() {
        ActionOutcome::Failed
    } else {
        ActionOutcome::Partial
    };
    let mut record = ProtectiveActionRecord::new(action.clone(), reason, outcome, affected);
    if !failures.is_empty() {
        record = record.with_detail(format!("failed positions: {failures:?}"));
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use risk_core::alerts::NullAlertSink;
    use risk_core::traits::HedgeInstruction;
    use risk_core::types::Direction;
    use risk_core::{Error, Result};
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeGateway {
        positions: StdMutex<Vec<Position>>,
        /// Ids that always fail.
        fail_always: StdMutex<HashSet<Uuid>>,
        /// Ids that fail exactly once, then succeed.
        fail_once: StdMutex<HashSet<Uuid>>,
        closed: StdMutex<Vec<Uuid>>,
        reduced: StdMutex<Vec<(Uuid, Decimal)>>,
        opened: StdMutex<Vec<(String, Direction, Decimal)>>,
        refuse_opens: StdMutex<bool>,
    }

    impl FakeGateway {
        fn with_positions(positions: Vec<Position>) -> Self {
            Self {
                positions: StdMutex::new(positions),
                ..Default::default()
            }
        }

        fn should_fail(&self, id: Uuid) -> bool {
            if self.fail_always.lock().unwrap().contains(&id) {
                return true;
            }
            self.fail_once.lock().unwrap().remove(&id)
        }
    }

    #[async_trait]
    impl ExecutionGateway for FakeGateway {
        async fn list_open_positions(&self) -> Result<Vec<Position>> {
            Ok(self.positions.lock().unwrap().clone())
        }

        async fn close_position(&self, id: Uuid) -> Result<()> {
            if self.should_fail(id) {
                return Err(Error::execution("close", "gateway rejected"));
            }
            self.closed.lock().unwrap().push(id);
            Ok(())
        }

        async fn reduce_position(&self, id: Uuid, fraction: Decimal) -> Result<()> {
            if self.should_fail(id) {
                return Err(Error::execution("reduce", "gateway rejected"));
            }
            self.reduced.lock().unwrap().push((id, fraction));
            Ok(())
        }

        async fn open_position(
            &self,
            instrument: &str,
            direction: Direction,
            size: Decimal,
        ) -> Result<Uuid> {
            if *self.refuse_opens.lock().unwrap() {
                return Err(Error::execution("open", "gateway rejected"));
            }
            self.opened
                .lock()
                .unwrap()
                .push((instrument.to_string(), direction, size));
            Ok(Uuid::new_v4())
        }
    }

    struct UsdResolver;

    impl HedgeInstrumentResolver for UsdResolver {
        fn resolve(&self, currency: &str, net_exposure: Decimal) -> Option<HedgeInstruction> {
            if currency == "USD" {
                return None;
            }
            let direction = if net_exposure > Decimal::ZERO {
                Direction::Short
            } else {
                Direction::Long
            };
            Some(HedgeInstruction {
                instrument: format!("{currency}USD"),
                direction,
                size: net_exposure.abs(),
            })
        }
    }

    fn executor_with(gateway: Arc<FakeGateway>) -> ProtectiveActionExecutor {
        executor_with_limits(
            gateway,
            RateLimitConfig { max_actions_per_day: 100, cooldown_minutes: 0 },
        )
    }

    fn executor_with_limits(
        gateway: Arc<FakeGateway>,
        rate_limit: RateLimitConfig,
    ) -> ProtectiveActionExecutor {
        ProtectiveActionExecutor::new(
            gateway,
            Arc::new(UsdResolver),
            Arc::new(AlertBook::new(Arc::new(NullAlertSink))),
            HedgeConfig { trigger_equity_fraction: Decimal::new(50, 2) },
            rate_limit,
        )
    }

    fn losing(instrument: &str, notional: i64) -> Position {
        Position::new(instrument, Direction::Long, Decimal::ONE, Decimal::new(notional, 0))
            .with_pnl(Decimal::new(-10, 0))
    }

    fn winning(instrument: &str, notional: i64) -> Position {
        Position::new(instrument, Direction::Long, Decimal::ONE, Decimal::new(notional, 0))
            .with_pnl(Decimal::new(10, 0))
    }

    #[tokio::test]
    async fn test_close_all_with_no_positions_is_success() {
        let gateway = Arc::new(FakeGateway::default());
        let executor = executor_with(Arc::clone(&gateway));

        let records = executor
            .execute_transition(&[ProtectiveAction::CloseAll], "test", Decimal::new(10_000, 0))
            .await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, ActionOutcome::Success);
        assert!(records[0].affected_position_ids.is_empty());
    }

    #[tokio::test]
    async fn test_close_losing_only_filters() {
        let win = winning("EURUSD", 1_000);
        let lose = losing("GBPUSD", 1_000);
        let lose_id = lose.id;
        let gateway = Arc::new(FakeGateway::with_positions(vec![win, lose]));
        let executor = executor_with(Arc::clone(&gateway));

        let records = executor
            .execute_transition(
                &[ProtectiveAction::CloseLosingOnly],
                "severe",
                Decimal::new(10_000, 0),
            )
            .await;
        assert_eq!(records[0].outcome, ActionOutcome::Success);
        assert_eq!(records[0].affected_position_ids, vec![lose_id]);
        assert_eq!(*gateway.closed.lock().unwrap(), vec![lose_id]);
    }

    #[tokio::test]
    async fn test_partial_failure_continues_and_alerts() {
        let a = losing("EURUSD", 1_000);
        let b = losing("GBPUSD", 1_000);
        let bad_id = a.id;
        let good_id = b.id;
        let gateway = Arc::new(FakeGateway::with_positions(vec![a, b]));
        gateway.fail_always.lock().unwrap().insert(bad_id);
        let executor = executor_with(Arc::clone(&gateway));

        let records = executor
            .execute_transition(
                &[
                    ProtectiveAction::CloseAll,
                    ProtectiveAction::RestrictTrading { minutes: 60 },
                ],
                "critical",
                Decimal::new(10_000, 0),
            )
            .await;

        assert_eq!(records[0].outcome, ActionOutcome::Partial);
        assert_eq!(records[0].affected_position_ids, vec![good_id]);
        // The list continued past the partial failure.
        assert_eq!(records[1].outcome, ActionOutcome::Success);
        assert!(executor.suspension().is_suspended(Utc::now()));
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let p = losing("EURUSD", 1_000);
        let id = p.id;
        let gateway = Arc::new(FakeGateway::with_positions(vec![p]));
        gateway.fail_once.lock().unwrap().insert(id);
        let executor = executor_with(Arc::clone(&gateway));

        let records = executor
            .execute_transition(&[ProtectiveAction::CloseAll], "test", Decimal::new(10_000, 0))
            .await;
        assert_eq!(records[0].outcome, ActionOutcome::Success);
        assert_eq!(*gateway.closed.lock().unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_reduce_sizes_hits_every_position() {
        let a = winning("EURUSD", 1_000);
        let b = losing("GBPUSD", 1_000);
        let gateway = Arc::new(FakeGateway::with_positions(vec![a, b]));
        let executor = executor_with(Arc::clone(&gateway));

        let fraction = Decimal::new(25, 2);
        let records = executor
            .execute_transition(
                &[ProtectiveAction::ReduceSizes { fraction }],
                "moderate",
                Decimal::new(10_000, 0),
            )
            .await;
        assert_eq!(records[0].outcome, ActionOutcome::Success);
        let reduced = gateway.reduced.lock().unwrap();
        assert_eq!(reduced.len(), 2);
        assert!(reduced.iter().all(|(_, f)| *f == fraction));
    }

    #[tokio::test]
    async fn test_emergency_hedge_offsets_concentration() {
        // Two long EUR positions: net EUR 18k against 20k equity (50% trigger).
        let gateway = Arc::new(FakeGateway::with_positions(vec![
            winning("EURUSD", 12_000),
            winning("EURJPY", 6_000),
        ]));
        let executor = executor_with(Arc::clone(&gateway));

        let records = executor
            .execute_transition(
                &[ProtectiveAction::EmergencyHedge],
                "severe",
                Decimal::new(20_000, 0),
            )
            .await;
        assert_eq!(records[0].outcome, ActionOutcome::Success);
        assert_eq!(records[0].affected_position_ids.len(), 1);

        let opened = gateway.opened.lock().unwrap();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].0, "EURUSD");
        assert_eq!(opened[0].1, Direction::Short);
        assert_eq!(opened[0].2, Decimal::new(18_000, 0));
    }

    #[tokio::test]
    async fn test_failed_hedge_does_not_abort_others() {
        let gateway = Arc::new(FakeGateway::with_positions(vec![winning("EURUSD", 12_000)]));
        *gateway.refuse_opens.lock().unwrap() = true;
        let executor = executor_with(Arc::clone(&gateway));

        let records = executor
            .execute_transition(
                &[ProtectiveAction::EmergencyHedge, ProtectiveAction::Alert],
                "severe",
                Decimal::new(10_000, 0),
            )
            .await;
        assert_eq!(records[0].outcome, ActionOutcome::Failed);
        assert_eq!(records[1].outcome, ActionOutcome::Success);
    }

    #[tokio::test]
    async fn test_daily_cap_skips_excess_actions() {
        let gateway = Arc::new(FakeGateway::with_positions(vec![winning("EURUSD", 1_000)]));
        let executor = executor_with_limits(
            Arc::clone(&gateway),
            RateLimitConfig { max_actions_per_day: 1, cooldown_minutes: 0 },
        );

        let first = executor
            .execute_transition(&[ProtectiveAction::CloseAll], "a", Decimal::new(10_000, 0))
            .await;
        assert_eq!(first[0].outcome, ActionOutcome::Success);

        let second = executor
            .execute_transition(&[ProtectiveAction::CloseAll], "b", Decimal::new(10_000, 0))
            .await;
        assert_eq!(second[0].outcome, ActionOutcome::Skipped);
        assert!(second[0].detail.as_deref().unwrap().contains("daily cap"));
    }

    #[tokio::test]
    async fn test_cooldown_blocks_next_transition_not_same_list() {
        let gateway = Arc::new(FakeGateway::with_positions(vec![winning("EURUSD", 1_000)]));
        let executor = executor_with_limits(
            Arc::clone(&gateway),
            RateLimitConfig { max_actions_per_day: 100, cooldown_minutes: 30 },
        );

        // One transition with two emergency actions: both run.
        let first = executor
            .execute_transition(
                &[
                    ProtectiveAction::CloseLosingOnly,
                    ProtectiveAction::ReduceSizes { fraction: Decimal::new(50, 2) },
                ],
                "severe",
                Decimal::new(10_000, 0),
            )
            .await;
        assert!(first.iter().all(|r| r.outcome == ActionOutcome::Success));

        // The immediately following transition is inside the cooldown.
        let second = executor
            .execute_transition(&[ProtectiveAction::CloseAll], "critical", Decimal::new(10_000, 0))
            .await;
        assert_eq!(second[0].outcome, ActionOutcome::Skipped);
        assert!(second[0].detail.as_deref().unwrap().contains("cooldown"));
    }

    #[tokio::test]
    async fn test_unresolved_failure_retried_until_it_lands() {
        let p = losing("EURUSD", 1_000);
        let id = p.id;
        let gateway = Arc::new(FakeGateway::with_positions(vec![p]));
        gateway.fail_always.lock().unwrap().insert(id);
        let executor = executor_with(Arc::clone(&gateway));
        let equity = Decimal::new(10_000, 0);

        let records = executor
            .execute_transition(&[ProtectiveAction::CloseAll], "critical", equity)
            .await;
        assert_eq!(records[0].outcome, ActionOutcome::Failed);
        assert!(executor.has_unresolved().await);

        // Still failing: another failure record, action stays queued.
        let retried = executor.retry_unresolved(equity).await;
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].outcome, ActionOutcome::Failed);
        assert!(executor.has_unresolved().await);

        // Gateway recovers: the re-attempt lands and the queue drains.
        gateway.fail_always.lock().unwrap().clear();
        let retried = executor.retry_unresolved(equity).await;
        assert_eq!(retried[0].outcome, ActionOutcome::Success);
        assert_eq!(*gateway.closed.lock().unwrap(), vec![id]);
        assert!(!executor.has_unresolved().await);
        assert!(executor.retry_unresolved(equity).await.is_empty());
    }

    #[tokio::test]
    async fn test_new_transition_supersedes_unresolved_queue() {
        let p = losing("EURUSD", 1_000);
        let id = p.id;
        let gateway = Arc::new(FakeGateway::with_positions(vec![p]));
        gateway.fail_always.lock().unwrap().insert(id);
        let executor = executor_with(Arc::clone(&gateway));
        let equity = Decimal::new(10_000, 0);

        executor
            .execute_transition(&[ProtectiveAction::CloseAll], "critical", equity)
            .await;
        assert!(executor.has_unresolved().await);

        // The next transition's list replaces the stale queue wholesale.
        executor
            .execute_transition(&[ProtectiveAction::Alert], "de-escalated", equity)
            .await;
        assert!(!executor.has_unresolved().await);
    }

    #[test]
    fn test_suspension_expires_and_lifts() {
        let suspension = TradingSuspension::new();
        assert!(!suspension.is_suspended(Utc::now()));

        suspension.suspend_for(60);
        assert!(suspension.is_suspended(Utc::now()));
        // Beyond the expiry instant the latch clears on its own.
        assert!(!suspension.is_suspended(Utc::now() + Duration::minutes(61)));

        suspension.suspend_for(60);
        suspension.lift();
        assert!(!suspension.is_suspended(Utc::now()));
    }

    #[tokio::test]
    async fn test_records_are_append_only() {
        let gateway = Arc::new(FakeGateway::default());
        let executor = executor_with(Arc::clone(&gateway));

        executor
            .execute_transition(&[ProtectiveAction::Alert], "a", Decimal::ZERO)
            .await;
        executor
            .execute_transition(&[ProtectiveAction::CloseAll], "b", Decimal::ZERO)
            .await;

        let records = executor.records().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].trigger_reason, "a");
        assert_eq!(records[1].trigger_reason, "b");
    }
}
