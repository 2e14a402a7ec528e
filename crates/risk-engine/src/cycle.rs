//! The periodic evaluation cycle.
//!
//! Each cycle takes one consistent snapshot of account and market state,
//! refreshes the correlation matrix and drawdown analyzer, runs the crisis
//! state machine, executes any committed transition's action list and
//! publishes an immutable [`RiskContext`]. While an elevated level holds,
//! actions that previously failed are re-attempted each cycle. A feed
//! failure skips the whole cycle and retains the previous state rather
//! than evaluating mixed-age data.

use chrono::Utc;
use correlation_engine::{build_clusters, cluster_alert_severity, max_risk_contribution, CorrelationEngine};
use crisis_manager::{CrisisInputs, CrisisStateMachine, ProtectiveActionExecutor, Transition};
use drawdown_analyzer::DrawdownAnalyzer;
use risk_core::alerts::{AlertBook, AlertKind, AlertSeverity};
use risk_core::config::RiskConfig;
use risk_core::traits::{AccountStateProvider, ExecutionGateway, HedgeInstrumentResolver, MarketDataProvider};
use risk_core::types::{CrisisLevel, ProtectiveActionRecord};
use risk_core::Result;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sizing_advisor::{SizeRequest, SizingAdvice, SizingAdvisor};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::context::RiskContext;

/// Short-window realized volatility above this multiple of the long-window
/// figure counts as a volatility spike.
const VOL_SPIKE_RATIO: f64 = 2.0;

/// Result of one `run_cycle` call.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Completed {
        context: Arc<RiskContext>,
        transition: Option<Transition>,
    },
    /// A feed failed; state was held. `consecutive` counts the run of skips.
    Skipped { reason: String, consecutive: u32 },
}

/// Owns every risk component and drives them once per cycle.
pub struct RiskEngine {
    config: RiskConfig,
    market: Arc<dyn MarketDataProvider>,
    account: Arc<dyn AccountStateProvider>,
    gateway: Arc<dyn ExecutionGateway>,
    alerts: Arc<AlertBook>,
    correlations: CorrelationEngine,
    drawdown: Mutex<DrawdownAnalyzer>,
    state: Mutex<CrisisStateMachine>,
    executor: ProtectiveActionExecutor,
    advisor: SizingAdvisor,
    /// Losing closed trades in a row, fed by `record_trade_result`.
    loss_streak: AtomicU32,
    consecutive_skips: AtomicU32,
    context: RwLock<Option<Arc<RiskContext>>>,
}

impl RiskEngine {
    pub fn new(
        config: RiskConfig,
        market: Arc<dyn MarketDataProvider>,
        account: Arc<dyn AccountStateProvider>,
        gateway: Arc<dyn ExecutionGateway>,
        resolver: Arc<dyn HedgeInstrumentResolver>,
        alerts: Arc<AlertBook>,
    ) -> Self {
        let correlations = CorrelationEngine::new(config.correlation.clone());
        let executor = ProtectiveActionExecutor::new(
            Arc::clone(&gateway),
            resolver,
            Arc::clone(&alerts),
            config.hedge.clone(),
            config.rate_limit.clone(),
        );
        let advisor = SizingAdvisor::new(config.sizing.clone(), Arc::clone(&alerts));
        Self {
            drawdown: Mutex::new(DrawdownAnalyzer::new(config.drawdown_history)),
            state: Mutex::new(CrisisStateMachine::new()),
            correlations,
            executor,
            advisor,
            config,
            market,
            account,
            gateway,
            alerts,
            loss_streak: AtomicU32::new(0),
            consecutive_skips: AtomicU32::new(0),
            context: RwLock::new(None),
        }
    }

    pub fn alerts(&self) -> Arc<AlertBook> {
        Arc::clone(&self.alerts)
    }

    pub fn correlations(&self) -> &CorrelationEngine {
        &self.correlations
    }

    /// Latest published snapshot, if at least one cycle has completed.
    pub async fn context(&self) -> Option<Arc<RiskContext>> {
        self.context.read().await.clone()
    }

    pub async fn crisis_level(&self) -> CrisisLevel {
        self.state.lock().await.level()
    }

    /// Audit trail of executed protective actions.
    pub async fn action_records(&self) -> Vec<ProtectiveActionRecord> {
        self.executor.records().await
    }

    /// Fold one closed trade outcome into the consecutive-loss counter.
    pub fn record_trade_result(&self, pnl: Decimal) {
        if pnl < Decimal::ZERO {
            let streak = self.loss_streak.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(streak, "Losing trade recorded");
        } else {
            self.loss_streak.store(0, Ordering::SeqCst);
        }
    }

    /// Run one evaluation cycle. Feed failures never poison state: the
    /// cycle is skipped wholesale and the previous context stays published.
    pub async fn run_cycle(&self) -> CycleOutcome {
        match self.try_cycle().await {
            Ok((context, transition)) => {
                self.consecutive_skips.store(0, Ordering::SeqCst);
                self.alerts.resolve(AlertKind::ConnectivityLoss, None);
                CycleOutcome::Completed { context, transition }
            }
            Err(err) => {
                let consecutive = self.consecutive_skips.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(error = %err, consecutive, "Cycle skipped");
                if consecutive >= self.config.max_consecutive_skips {
                    self.alerts.raise(
                        AlertKind::ConnectivityLoss,
                        None,
                        AlertSeverity::Critical,
                        format!("{consecutive} consecutive cycles skipped: {err}"),
                    );
                }
                CycleOutcome::Skipped { reason: err.to_string(), consecutive }
            }
        }
    }

    async fn try_cycle(&self) -> Result<(Arc<RiskContext>, Option<Transition>)> {
        let snapshot = self.account.account_snapshot().await?;
        let positions = self.gateway.list_open_positions().await?;

        // Aggregate per instrument; a book can hold several positions in one.
        let mut holdings: BTreeMap<String, Decimal> = BTreeMap::new();
        for position in &positions {
            *holdings.entry(position.instrument.clone()).or_insert(Decimal::ZERO) +=
                position.notional_exposure;
        }

        let depth = self.config.correlation.price_capacity();
        for instrument in holdings.keys() {
            let bars = self.market.get_history(instrument, depth).await?;
            self.correlations.observe_history(instrument, &bars);
        }

        let held: Vec<String> = holdings.keys().cloned().collect();
        let update = self.correlations.update_matrix(&held, None);
        if !update.insufficient.is_empty() {
            debug!(
                pairs = update.insufficient.len(),
                "Pairs below sample floor this cycle"
            );
        }

        let holdings_vec: Vec<(String, Decimal)> = holdings.into_iter().collect();
        let clusters = build_clusters(
            &self.correlations,
            &holdings_vec,
            self.config.correlation.cluster_threshold,
        );
        let max_cluster_risk = max_risk_contribution(&clusters);

        let (drawdown_pct, drawdown_velocity) = {
            let mut analyzer = self.drawdown.lock().await;
            analyzer.update(snapshot.equity_sample());
            (analyzer.current_drawdown_pct(), analyzer.velocity(snapshot.timestamp))
        };

        let volatility_spike = self.detect_volatility_spike(&held);

        let inputs = CrisisInputs {
            drawdown_pct,
            margin_level: snapshot.margin_level,
            max_cluster_risk,
            volatility_spike,
            consecutive_losses: self.loss_streak.load(Ordering::SeqCst),
            data_healthy: true,
        };

        let transition = {
            let mut state = self.state.lock().await;
            state.evaluate(&inputs, &self.config.levels, self.config.debounce_cycles)
        };
        let crisis_level = self.state.lock().await.level();

        self.publish_cluster_alerts(&clusters, crisis_level);

        if let Some(t) = &transition {
            let severity = if t.is_escalation() {
                error!(from = %t.from, to = %t.to, reason = %t.reason, "Crisis escalation");
                AlertSeverity::Warning
            } else {
                info!(from = %t.from, to = %t.to, "Crisis de-escalation");
                AlertSeverity::Info
            };
            self.alerts.raise(
                AlertKind::CrisisTransition,
                None,
                severity,
                t.reason.clone(),
            );
            // Every transition runs its destination's list; the rate
            // limiter throttles runaway re-execution.
            self.executor
                .execute_transition(&t.actions, &t.reason, snapshot.equity)
                .await;
        } else if crisis_level > CrisisLevel::Normal {
            // The level holds: anything that failed or was throttled on the
            // committing cycle gets another attempt now.
            self.executor.retry_unresolved(snapshot.equity).await;
        }

        let context = Arc::new(RiskContext {
            timestamp: snapshot.timestamp,
            equity: snapshot.equity,
            balance: snapshot.balance,
            margin_level: snapshot.margin_level,
            crisis_level,
            drawdown_pct,
            drawdown_velocity,
            clusters,
            max_cluster_risk,
            volatility_spike,
            open_positions: positions,
        });
        *self.context.write().await = Some(Arc::clone(&context));
        Ok((context, transition))
    }

    /// Pre-trade sizing advice against fresh account and matrix state.
    pub async fn advise(&self, request: &SizeRequest) -> Result<SizingAdvice> {
        let snapshot = self.account.account_snapshot().await?;
        let positions = self.gateway.list_open_positions().await?;

        let depth = self.config.correlation.price_capacity();
        let bars = self.market.get_history(&request.instrument, depth).await?;
        self.correlations.observe_history(&request.instrument, &bars);

        let held: Vec<String> = positions.iter().map(|p| p.instrument.clone()).collect();
        self.correlations.update_matrix(&held, Some(&request.instrument));

        let crisis_level = self.state.lock().await.level();
        let suspended = self.executor.suspension().is_suspended(Utc::now());
        Ok(self.advisor.advise(
            request,
            &positions,
            &self.correlations,
            crisis_level,
            snapshot.equity,
            suspended,
        ))
    }

    /// Drive cycles at a fixed period until the shutdown flag flips.
    pub async fn run_periodic(
        &self,
        period: std::time::Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(period);
        info!(period_secs = period.as_secs(), "Risk engine started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Risk engine stopping");
                        break;
                    }
                }
            }
        }
    }

    fn publish_cluster_alerts(&self, clusters: &[correlation_engine::Cluster], level: CrisisLevel) {
        for cluster in clusters {
            self.alerts.raise(
                AlertKind::ClusterRisk,
                Some(cluster.scope()),
                cluster_alert_severity(level),
                format!(
                    "{} instruments, avg correlation {:.2}, risk contribution {:.2}",
                    cluster.instruments.len(),
                    cluster.average_intra_correlation,
                    cluster.risk_contribution
                ),
            );
        }
    }

    // Short-window realized volatility measured against the long window,
    // per held instrument. Needs a full long window of history.
    fn detect_volatility_spike(&self, held: &[String]) -> bool {
        let long = self.config.correlation.long_window;
        let short = self.config.correlation.short_window;
        for instrument in held {
            let closes = self.correlations.recent_closes(instrument, long + 1);
            if closes.len() < long + 1 {
                continue;
            }
            let returns: Vec<f64> = closes
                .windows(2)
                .filter_map(|w| {
                    let (prev, cur) = (w[0].to_f64()?, w[1].to_f64()?);
                    (prev > 0.0 && cur > 0.0).then(|| (cur / prev).ln())
                })
                .collect();
            if returns.len() < long {
                continue;
            }
            let long_vol = std_dev(&returns);
            let short_vol = std_dev(&returns[returns.len() - short..]);
            if long_vol > 0.0 && short_vol > VOL_SPIKE_RATIO * long_vol {
                warn!(
                    instrument = %instrument,
                    short_vol,
                    long_vol,
                    "Volatility spike detected"
                );
                return true;
            }
        }
        false
    }
}

fn std_dev(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}
