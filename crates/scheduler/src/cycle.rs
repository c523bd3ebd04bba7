//! One scan → analysis → decision → execution cycle.
//!
//! Each stage fans out over the ranked candidates with `join_all` and joins
//! before the next stage starts. Provider failures degrade to neutral
//! defaults, store failures skip the affected symbol; a cycle always finishes
//! with a [`CycleReport`].

use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use pipeline_core::config::{Config, PipelineConfig};
use pipeline_core::db::{RecordKind, RecordStore, StoredRecord};
use pipeline_core::providers::{AnalysisProvider, DecisionProvider, MarketDataProvider, Notifier};
use pipeline_core::types::{Analysis, Decision, DecisionStatus, Opportunity, TpLadder};
use risk_manager::{AdaptiveTpManager, TargetLadder, TrailingStopManager, TrailingStopRepository};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use trading_engine::{AdmissionGate, ContradictionResolver, ExecutionReport, OrderExecutor};

use crate::events::{EventBus, PipelineEvent};

/// External collaborators the cycle calls into.
pub struct Providers {
    pub market: Arc<dyn MarketDataProvider>,
    pub analyst: Arc<dyn AnalysisProvider>,
    pub decider: Arc<dyn DecisionProvider>,
}

/// Counters for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub scanned: usize,
    pub candidates: usize,
    pub analyzed: usize,
    pub escalated: usize,
    pub decided: usize,
    pub executed: usize,
    pub rejected: usize,
    pub skipped_duplicate: usize,
    pub skipped_insufficient: usize,
    pub skipped_hold: usize,
    /// Provider calls that failed and were replaced by a neutral default.
    pub fallbacks: usize,
    pub duration_ms: u64,
}

enum AnalysisOutcome {
    Produced {
        opportunity: Opportunity,
        analysis: Analysis,
        fallback: bool,
    },
    Duplicate,
    Failed,
}

enum DecisionOutcome {
    Decided { decision: Decision, fallback: bool },
    Duplicate,
    Failed,
}

/// Everything a cycle and the monitor loop operate on.
pub struct Pipeline {
    pub(crate) providers: Providers,
    pub(crate) gate: AdmissionGate,
    pub(crate) resolver: ContradictionResolver,
    pub(crate) executor: OrderExecutor,
    pub(crate) trailing: Arc<TrailingStopManager>,
    pub(crate) adaptive: Arc<AdaptiveTpManager>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) events: EventBus,
    pub(crate) settings: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        providers: Providers,
        store: Arc<dyn RecordStore>,
        executor: OrderExecutor,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let window = Duration::hours(config.pipeline.dedup_window_hours);
        Self {
            providers,
            gate: AdmissionGate::new(store, window, config.admission.clone()),
            resolver: ContradictionResolver::new(config.resolution.clone()),
            executor,
            trailing: Arc::new(TrailingStopManager::new(config.risk.clone(), notifier.clone())),
            adaptive: Arc::new(AdaptiveTpManager::new(config.risk.clone())),
            notifier,
            events: EventBus::default(),
            settings: config.pipeline.clone(),
        }
    }

    /// Persist trailing stops through `repository`.
    pub fn with_trailing_repository(mut self, repository: Arc<TrailingStopRepository>) -> Self {
        let manager = TrailingStopManager::new(self.trailing.config().clone(), self.notifier.clone())
            .with_repository(repository);
        self.trailing = Arc::new(manager);
        self
    }

    pub fn trailing(&self) -> &Arc<TrailingStopManager> {
        &self.trailing
    }

    pub fn adaptive(&self) -> &Arc<AdaptiveTpManager> {
        &self.adaptive
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn executor(&self) -> &OrderExecutor {
        &self.executor
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn settings(&self) -> &PipelineConfig {
        &self.settings
    }

    /// Run one full cycle.
    pub async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let now = Utc::now();
        let mut report = CycleReport::default();

        let opportunities = match self.providers.market.scan().await {
            Ok(opportunities) => opportunities,
            Err(e) => {
                warn!(error = %e, "Market scan failed, skipping cycle");
                return self.finish(report, started);
            }
        };
        report.scanned = opportunities.len();

        let candidates = rank(opportunities, self.settings.max_candidates);
        report.candidates = candidates.len();
        for opportunity in &candidates {
            self.store_opportunity(opportunity, now).await;
        }

        // Analysis
        let outcomes = join_all(
            candidates
                .into_iter()
                .map(|opportunity| self.analyze(opportunity, now)),
        )
        .await;

        let mut escalated = Vec::new();
        for outcome in outcomes {
            match outcome {
                AnalysisOutcome::Produced {
                    opportunity,
                    analysis,
                    fallback,
                } => {
                    report.analyzed += 1;
                    if fallback {
                        report.fallbacks += 1;
                    }
                    self.events.publish(PipelineEvent::AnalysisProduced(analysis.clone()));

                    let verdict = self.gate.meets_escalation_criteria(&analysis, &opportunity);
                    if verdict.admitted {
                        debug!(symbol = %opportunity.symbol, signals = ?verdict.signals, "Escalating to decision stage");
                        escalated.push((opportunity, analysis));
                    } else {
                        info!(symbol = %opportunity.symbol, reason = %verdict.reason, "Insufficient signal, not escalating");
                        report.skipped_insufficient += 1;
                    }
                }
                AnalysisOutcome::Duplicate => report.skipped_duplicate += 1,
                AnalysisOutcome::Failed => {}
            }
        }
        report.escalated = escalated.len();

        // Decision, resolution and execution
        let outcomes = join_all(
            escalated
                .into_iter()
                .map(|(opportunity, analysis)| self.decide(opportunity, analysis, now)),
        )
        .await;

        for outcome in outcomes {
            match outcome {
                DecisionOutcome::Decided { decision, fallback } => {
                    report.decided += 1;
                    if fallback {
                        report.fallbacks += 1;
                    }
                    match decision.status {
                        DecisionStatus::Executed => report.executed += 1,
                        DecisionStatus::Rejected => report.rejected += 1,
                        DecisionStatus::Skipped => report.skipped_hold += 1,
                        DecisionStatus::Pending => {}
                    }
                }
                DecisionOutcome::Duplicate => report.skipped_duplicate += 1,
                DecisionOutcome::Failed => {}
            }
        }

        self.finish(report, started)
    }

    fn finish(&self, mut report: CycleReport, started: Instant) -> CycleReport {
        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            scanned = report.scanned,
            analyzed = report.analyzed,
            escalated = report.escalated,
            decided = report.decided,
            executed = report.executed,
            rejected = report.rejected,
            skipped_duplicate = report.skipped_duplicate,
            skipped_insufficient = report.skipped_insufficient,
            duration_ms = report.duration_ms,
            "Cycle completed"
        );
        self.events.publish(PipelineEvent::CycleCompleted(report.clone()));
        report
    }

    /// Store the opportunity once per window. Losing the claim does not drop
    /// the symbol; the analysis gate decides that.
    async fn store_opportunity(&self, opportunity: &Opportunity, now: DateTime<Utc>) {
        let payload = match serde_json::to_value(opportunity) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(symbol = %opportunity.symbol, error = %e, "Failed to encode opportunity");
                return;
            }
        };
        match self
            .gate
            .claim(RecordKind::Opportunity, &opportunity.symbol, payload, now)
            .await
        {
            Ok(true) => self.events.publish(PipelineEvent::OpportunityFound(opportunity.clone())),
            Ok(false) => debug!(symbol = %opportunity.symbol, "Opportunity already stored in this window"),
            Err(e) => warn!(symbol = %opportunity.symbol, error = %e, "Failed to store opportunity"),
        }
    }

    async fn analyze(&self, opportunity: Opportunity, now: DateTime<Utc>) -> AnalysisOutcome {
        let symbol = opportunity.symbol.clone();
        match self.gate.should_emit(RecordKind::Analysis, &symbol, now).await {
            Ok(true) => {}
            Ok(false) => return AnalysisOutcome::Duplicate,
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Record store unavailable, skipping analysis");
                return AnalysisOutcome::Failed;
            }
        }

        let (mut analysis, fallback) = match self.providers.analyst.analyze(&opportunity).await {
            Ok(analysis) => (analysis, false),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Analysis provider failed, using neutral default");
                (Analysis::neutral(&symbol), true)
            }
        };
        if analysis.indicators.atr.is_none() {
            analysis.indicators.atr = self.fetch_atr(&symbol).await;
        }

        let reference = opportunity.current_price.to_f64().unwrap_or(0.0);
        self.resolver.apply_to_analysis(&mut analysis, reference);

        match self.persist_claim(RecordKind::Analysis, &symbol, &analysis, now).await {
            Some(true) => AnalysisOutcome::Produced {
                opportunity,
                analysis,
                fallback,
            },
            Some(false) => AnalysisOutcome::Duplicate,
            None => AnalysisOutcome::Failed,
        }
    }

    async fn fetch_atr(&self, symbol: &str) -> Option<f64> {
        match self
            .providers
            .market
            .history(symbol, self.settings.history_lookback)
            .await
        {
            Ok(history) => history.atr(self.settings.atr_period),
            Err(e) => {
                debug!(symbol = %symbol, error = %e, "No price history, ATR falls back to default");
                None
            }
        }
    }

    async fn decide(&self, opportunity: Opportunity, analysis: Analysis, now: DateTime<Utc>) -> DecisionOutcome {
        let symbol = opportunity.symbol.clone();
        match self.gate.should_emit(RecordKind::Decision, &symbol, now).await {
            Ok(true) => {}
            Ok(false) => return DecisionOutcome::Duplicate,
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Record store unavailable, skipping decision");
                return DecisionOutcome::Failed;
            }
        }

        let (mut decision, fallback) = match self.providers.decider.decide(&opportunity, &analysis).await {
            Ok(decision) => (decision, false),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Decision provider failed, using neutral default");
                (Decision::neutral(&symbol), true)
            }
        };
        decision.analysis_id = Some(analysis.id);
        if decision.entry_price.is_none() {
            decision.entry_price = Some(opportunity.current_price);
        }

        // A fallback is not a recommendation; never resolve it into a trade.
        if !decision.degraded {
            let reference = opportunity.current_price.to_f64().unwrap_or(0.0);
            self.resolver.apply_to_decision(&mut decision, &analysis, reference);
        }

        if decision.signal.is_hold() {
            decision.status = DecisionStatus::Skipped;
            info!(symbol = %symbol, confidence = decision.confidence, "Decision is hold, nothing to execute");
        }

        match self.persist_claim(RecordKind::Decision, &symbol, &decision, now).await {
            Some(true) => {}
            Some(false) => return DecisionOutcome::Duplicate,
            None => return DecisionOutcome::Failed,
        }

        if decision.is_actionable() {
            self.execute(&mut decision, opportunity.volume_24h).await;
            self.record_outcome(&decision).await;
        }
        self.events.publish(PipelineEvent::DecisionMade(decision.clone()));

        DecisionOutcome::Decided { decision, fallback }
    }

    /// Execute and, on a fill, open both risk records. No retries.
    async fn execute(&self, decision: &mut Decision, volume_at_entry: Decimal) {
        let report = match self.executor.execute(decision).await {
            Ok(report) => report,
            Err(e) => {
                warn!(symbol = %decision.symbol, error = %e, "Order could not be built, decision rejected");
                decision.status = DecisionStatus::Rejected;
                return;
            }
        };

        if !report.is_success() {
            warn!(
                symbol = %decision.symbol,
                reason = report.reason.as_deref().unwrap_or("unknown"),
                "Order rejected"
            );
            decision.status = DecisionStatus::Rejected;
            return;
        }

        decision.status = DecisionStatus::Executed;
        decision.position_id = Some(report.position_id());
        self.open_risk_records(&report, &decision.take_profits, volume_at_entry).await;
    }

    /// The trailing stop always uses the standard ladder. The adaptive
    /// targets start from the provider's proposal when it is usable.
    async fn open_risk_records(&self, report: &ExecutionReport, proposal: &[Decimal], volume_at_entry: Decimal) {
        let order = &report.order;
        let entry = report.entry_price();
        let ladder = TpLadder::from_reference(entry, order.direction);
        let targets = TargetLadder::from_proposal(entry, order.direction, proposal).unwrap_or_else(|| {
            if !proposal.is_empty() {
                debug!(symbol = %order.symbol, levels = proposal.len(), "Take-profit proposal unusable, using standard ladder");
            }
            TargetLadder::from_tp_ladder(&ladder)
        });

        if let Err(e) = self
            .trailing
            .create(&order.symbol, order.id, order.leverage, order.stop_loss, ladder.clone())
            .await
        {
            error!(position_id = %order.id, symbol = %order.symbol, error = %e, "Failed to create trailing stop");
        }

        if let Err(e) = self.adaptive.create(
            &order.symbol,
            order.id,
            order.direction,
            entry,
            targets,
            volume_at_entry,
        ) {
            error!(position_id = %order.id, symbol = %order.symbol, error = %e, "Failed to create adaptive take-profit");
        }
    }

    /// Claim the dedup window with `value` as payload. `None` on store or
    /// encoding failure.
    async fn persist_claim<T: Serialize>(
        &self,
        kind: RecordKind,
        symbol: &str,
        value: &T,
        now: DateTime<Utc>,
    ) -> Option<bool> {
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                error!(symbol = %symbol, kind = %kind, error = %e, "Failed to encode record");
                return None;
            }
        };
        match self.gate.claim(kind, symbol, payload, now).await {
            Ok(claimed) => Some(claimed),
            Err(e) => {
                error!(symbol = %symbol, kind = %kind, error = %e, "Failed to persist record");
                None
            }
        }
    }

    /// Append the post-execution state of a decision to its history.
    async fn record_outcome(&self, decision: &Decision) {
        let payload = match serde_json::to_value(decision) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(symbol = %decision.symbol, error = %e, "Failed to encode decision outcome");
                return;
            }
        };
        let record = StoredRecord::new(RecordKind::Decision, &decision.symbol, payload, Utc::now());
        if let Err(e) = self.gate.store().insert(&record).await {
            warn!(symbol = %decision.symbol, error = %e, "Failed to persist decision outcome");
        }
    }
}

/// Best score first, one entry per symbol, at most `limit`.
pub fn rank(mut opportunities: Vec<Opportunity>, limit: usize) -> Vec<Opportunity> {
    opportunities.sort_by(|a, b| b.score().partial_cmp(&a.score()).unwrap_or(Ordering::Equal));
    let mut seen = HashSet::new();
    opportunities.retain(|o| seen.insert(o.symbol.clone()));
    opportunities.truncate(limit);
    opportunities
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use pipeline_core::types::Recommendation;

    #[test]
    fn test_rank_orders_dedups_and_truncates() {
        let ranked = rank(
            vec![
                opportunity("AAA", 1.0),
                opportunity("BBB", -9.0),
                opportunity("CCC", 4.0),
                opportunity("BBB", 2.0),
            ],
            2,
        );
        let symbols: Vec<_> = ranked.iter().map(|o| o.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BBB", "CCC"]);
    }

    #[tokio::test]
    async fn test_cycle_executes_and_opens_risk_records() {
        let mut market = MockMarket::new();
        market
            .expect_scan()
            .returning(|| Ok(vec![opportunity("SOLUSDT", 7.5)]));
        let mut analyst = MockAnalyst::new();
        analyst
            .expect_analyze()
            .times(1)
            .returning(|o| Ok(bullish_analysis(&o.symbol)));
        let mut decider = MockDecider::new();
        decider
            .expect_decide()
            .times(1)
            .returning(|o, _| Ok(long_decision(&o.symbol)));

        let (pipeline, store) = pipeline(market, analyst, decider);
        let mut events = pipeline.events().subscribe();
        let report = pipeline.run_cycle().await;

        assert_eq!(report.analyzed, 1);
        assert_eq!(report.escalated, 1);
        assert_eq!(report.executed, 1);
        assert_eq!(pipeline.trailing().len(), 1);
        assert_eq!(pipeline.adaptive().len(), 1);

        let stops = pipeline.trailing().for_symbol("SOLUSDT").await;
        assert_eq!(stops[0].current_stop_loss, Decimal::new(97, 0));
        assert_eq!(stops[0].trailing_percentage, Decimal::new(3, 0));

        // Claimed pending decision plus the executed outcome.
        assert_eq!(store.records_for(RecordKind::Decision, "SOLUSDT").len(), 2);
        assert_eq!(store.records_for(RecordKind::Analysis, "SOLUSDT").len(), 1);

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.channel());
        }
        assert!(kinds.contains(&crate::events::channels::DECISIONS));
        assert_eq!(kinds.last(), Some(&crate::events::channels::CYCLES));
    }

    #[tokio::test]
    async fn test_second_cycle_is_deduplicated() {
        let mut market = MockMarket::new();
        market
            .expect_scan()
            .returning(|| Ok(vec![opportunity("SOLUSDT", 7.5)]));
        let mut analyst = MockAnalyst::new();
        analyst
            .expect_analyze()
            .times(1)
            .returning(|o| Ok(bullish_analysis(&o.symbol)));
        let mut decider = MockDecider::new();
        decider
            .expect_decide()
            .times(1)
            .returning(|o, _| Ok(long_decision(&o.symbol)));

        let (pipeline, _store) = pipeline(market, analyst, decider);
        pipeline.run_cycle().await;
        let second = pipeline.run_cycle().await;

        assert_eq!(second.analyzed, 0);
        assert_eq!(second.skipped_duplicate, 1);
        assert_eq!(pipeline.trailing().len(), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_degrades_to_neutral_hold() {
        let mut market = MockMarket::new();
        market
            .expect_scan()
            .returning(|| Ok(vec![opportunity("ADAUSDT", 6.0)]));
        market
            .expect_history()
            .returning(|_, _| Err(pipeline_core::Error::provider("market", "timeout")));
        let mut analyst = MockAnalyst::new();
        analyst
            .expect_analyze()
            .returning(|_| Err(pipeline_core::Error::provider("analysis", "HTTP 503")));
        let mut decider = MockDecider::new();
        decider.expect_decide().never();

        let (pipeline, store) = pipeline(market, analyst, decider);
        let report = pipeline.run_cycle().await;

        assert_eq!(report.analyzed, 1);
        assert_eq!(report.fallbacks, 1);
        assert_eq!(report.skipped_insufficient, 1);
        assert_eq!(report.escalated, 0);
        let stored = store.records_for(RecordKind::Analysis, "ADAUSDT");
        assert_eq!(stored[0].payload["degraded"], true);
    }

    #[tokio::test]
    async fn test_failed_decision_provider_skips_execution() {
        let mut market = MockMarket::new();
        market
            .expect_scan()
            .returning(|| Ok(vec![opportunity("XRPUSDT", 8.0)]));
        let mut analyst = MockAnalyst::new();
        analyst
            .expect_analyze()
            .returning(|o| Ok(bullish_analysis(&o.symbol)));
        let mut decider = MockDecider::new();
        decider
            .expect_decide()
            .returning(|_, _| Err(pipeline_core::Error::provider("decision", "malformed")));

        let (pipeline, _store) = pipeline(market, analyst, decider);
        let report = pipeline.run_cycle().await;

        assert_eq!(report.decided, 1);
        assert_eq!(report.skipped_hold, 1);
        assert_eq!(report.executed, 0);
        assert!(pipeline.trailing().is_empty());
    }

    #[tokio::test]
    async fn test_hold_decision_resolved_into_pattern_trade() {
        let mut market = MockMarket::new();
        market
            .expect_scan()
            .returning(|| Ok(vec![opportunity("AVAXUSDT", 8.0)]));
        let mut analyst = MockAnalyst::new();
        analyst
            .expect_analyze()
            .returning(|o| Ok(bullish_analysis(&o.symbol)));
        let mut decider = MockDecider::new();
        decider.expect_decide().returning(|o, _| {
            let mut d = long_decision(&o.symbol);
            d.signal = Recommendation::Hold;
            Ok(d)
        });

        let (pipeline, _store) = pipeline(market, analyst, decider);
        let report = pipeline.run_cycle().await;

        // Pattern 3.33 beats hold 0.6; stop sits 1.2 ATR below entry.
        assert_eq!(report.executed, 1);
        let stops = pipeline.trailing().for_symbol("AVAXUSDT").await;
        assert_eq!(stops[0].direction, pipeline_core::types::Direction::Long);
        assert_eq!(stops[0].initial_stop_loss, Decimal::new(976, 1));
    }

    #[tokio::test]
    async fn test_unbuildable_order_is_rejected_without_risk_records() {
        let mut market = MockMarket::new();
        market
            .expect_scan()
            .returning(|| Ok(vec![opportunity("DOTUSDT", 9.0)]));
        let mut analyst = MockAnalyst::new();
        analyst
            .expect_analyze()
            .returning(|o| Ok(bullish_analysis(&o.symbol)));
        let mut decider = MockDecider::new();
        decider.expect_decide().returning(|o, _| {
            let mut d = long_decision(&o.symbol);
            d.entry_price = Some(Decimal::ZERO);
            Ok(d)
        });

        let (pipeline, _store) = pipeline(market, analyst, decider);
        let report = pipeline.run_cycle().await;

        assert_eq!(report.rejected, 1);
        assert!(pipeline.trailing().is_empty());
        assert!(pipeline.adaptive().is_empty());
    }

    #[tokio::test]
    async fn test_scan_failure_yields_empty_report() {
        let mut market = MockMarket::new();
        market
            .expect_scan()
            .returning(|| Err(pipeline_core::Error::provider("market", "down")));
        let (pipeline, store) = pipeline(market, MockAnalyst::new(), MockDecider::new());

        let report = pipeline.run_cycle().await;
        assert_eq!(report.scanned, 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_entry_price_uses_scan_price() {
        let mut market = MockMarket::new();
        market
            .expect_scan()
            .returning(|| Ok(vec![opportunity("LINKUSDT", 7.0)]));
        let mut analyst = MockAnalyst::new();
        analyst
            .expect_analyze()
            .returning(|o| Ok(bullish_analysis(&o.symbol)));
        let mut decider = MockDecider::new();
        decider.expect_decide().returning(|o, _| {
            let mut d = long_decision(&o.symbol);
            d.entry_price = None;
            d.stop_loss = None;
            Ok(d)
        });

        let (pipeline, _store) = pipeline(market, analyst, decider);
        let mut events = pipeline.events().subscribe();
        pipeline.run_cycle().await;

        let decision = std::iter::from_fn(|| events.try_recv().ok())
            .find_map(|e| match e {
                PipelineEvent::DecisionMade(d) => Some(d),
                _ => None,
            })
            .unwrap();
        assert_eq!(decision.signal, Recommendation::Long);
        assert_eq!(decision.entry_price, Some(Decimal::new(100, 0)));
        assert_eq!(decision.status, DecisionStatus::Executed);
        // Default 3% stop below the 100 entry.
        let stops = pipeline.trailing().for_symbol("LINKUSDT").await;
        assert_eq!(stops[0].initial_stop_loss, Decimal::new(97, 0));
    }

    #[tokio::test]
    async fn test_proposed_ladder_seeds_adaptive_targets() {
        let mut market = MockMarket::new();
        market
            .expect_scan()
            .returning(|| Ok(vec![opportunity("DOTUSDT", 7.0)]));
        let mut analyst = MockAnalyst::new();
        analyst
            .expect_analyze()
            .returning(|o| Ok(bullish_analysis(&o.symbol)));
        let mut decider = MockDecider::new();
        decider.expect_decide().returning(|o, _| {
            let mut d = long_decision(&o.symbol);
            d.take_profits = [102, 104, 107, 110].into_iter().map(|p| Decimal::new(p, 0)).collect();
            Ok(d)
        });

        let (pipeline, _store) = pipeline(market, analyst, decider);
        pipeline.run_cycle().await;

        let stop = pipeline.trailing().for_symbol("DOTUSDT").await.remove(0);
        let targets = pipeline.adaptive().get(stop.position_id).await.unwrap();
        assert_eq!(targets.initial_ladder.tp1, Decimal::new(102, 0));
        assert_eq!(targets.initial_ladder.tp2, Decimal::new(104, 0));
        assert_eq!(targets.initial_ladder.tp4, Decimal::new(110, 0));
        // Trailing tiers stay on the standard ladder.
        assert_eq!(stop.ladder.price(pipeline_core::types::TpTier::Tp2), Decimal::new(103, 0));
    }

    #[tokio::test]
    async fn test_single_level_proposal_falls_back_to_standard_targets() {
        let mut market = MockMarket::new();
        market
            .expect_scan()
            .returning(|| Ok(vec![opportunity("DOTUSDT", 7.0)]));
        let mut analyst = MockAnalyst::new();
        analyst
            .expect_analyze()
            .returning(|o| Ok(bullish_analysis(&o.symbol)));
        let mut decider = MockDecider::new();
        decider.expect_decide().returning(|o, _| Ok(long_decision(&o.symbol)));

        let (pipeline, _store) = pipeline(market, analyst, decider);
        pipeline.run_cycle().await;

        let stop = pipeline.trailing().for_symbol("DOTUSDT").await.remove(0);
        let targets = pipeline.adaptive().get(stop.position_id).await.unwrap();
        assert_eq!(targets.initial_ladder.tp2, Decimal::new(103, 0));
    }

    #[tokio::test]
    async fn test_recent_decision_blocks_decision_stage() {
        let mut market = MockMarket::new();
        market
            .expect_scan()
            .returning(|| Ok(vec![opportunity("SOLUSDT", 7.5)]));
        let mut analyst = MockAnalyst::new();
        analyst
            .expect_analyze()
            .times(1)
            .returning(|o| Ok(bullish_analysis(&o.symbol)));
        let mut decider = MockDecider::new();
        decider.expect_decide().never();

        let (pipeline, store) = pipeline(market, analyst, decider);
        let earlier = StoredRecord::new(
            RecordKind::Decision,
            "SOLUSDT",
            serde_json::json!({}),
            Utc::now() - Duration::hours(1),
        );
        store.insert(&earlier).await.unwrap();

        let report = pipeline.run_cycle().await;
        assert_eq!(report.analyzed, 1);
        assert_eq!(report.escalated, 1);
        assert_eq!(report.skipped_duplicate, 1);
        assert_eq!(report.executed, 0);
        assert!(pipeline.trailing().is_empty());
    }

    /// Lets `should_emit` pass, then stores a competing decision right
    /// before the claim, as a concurrent writer would.
    struct CompetingWriterStore {
        inner: pipeline_core::db::MemoryRecordStore,
    }

    #[async_trait::async_trait]
    impl RecordStore for CompetingWriterStore {
        async fn latest_since(
            &self,
            kind: RecordKind,
            symbol: &str,
            since: DateTime<Utc>,
        ) -> pipeline_core::Result<Option<StoredRecord>> {
            self.inner.latest_since(kind, symbol, since).await
        }

        async fn insert(&self, record: &StoredRecord) -> pipeline_core::Result<()> {
            self.inner.insert(record).await
        }

        async fn insert_if_absent(&self, record: &StoredRecord, window: Duration) -> pipeline_core::Result<bool> {
            if record.kind == RecordKind::Decision {
                let rival = StoredRecord::new(record.kind, &record.symbol, serde_json::json!({}), record.created_at);
                self.inner.insert(&rival).await?;
            }
            self.inner.insert_if_absent(record, window).await
        }
    }

    #[tokio::test]
    async fn test_lost_decision_claim_skips_execution() {
        let mut market = MockMarket::new();
        market
            .expect_scan()
            .returning(|| Ok(vec![opportunity("SOLUSDT", 7.5)]));
        let mut analyst = MockAnalyst::new();
        analyst
            .expect_analyze()
            .returning(|o| Ok(bullish_analysis(&o.symbol)));
        let mut decider = MockDecider::new();
        decider
            .expect_decide()
            .times(1)
            .returning(|o, _| Ok(long_decision(&o.symbol)));

        let store = Arc::new(CompetingWriterStore {
            inner: pipeline_core::db::MemoryRecordStore::new(),
        });
        let pipeline = pipeline_with_store(market, analyst, decider, store.clone());
        let report = pipeline.run_cycle().await;

        assert_eq!(report.escalated, 1);
        assert_eq!(report.skipped_duplicate, 1);
        assert_eq!(report.executed, 0);
        assert!(pipeline.trailing().is_empty());
        assert_eq!(pipeline.executor().metrics().orders_submitted, 0);
        // Only the competing record was stored.
        assert_eq!(store.inner.records_for(RecordKind::Decision, "SOLUSDT").len(), 1);
    }
}
