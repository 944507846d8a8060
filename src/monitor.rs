//! Order monitor: polls open orders, detects closures, notifies the user.
//!
//! One cycle:
//! 1. Snapshot the tracked set
//! 2. Read open orders, then look up tracked orders that are no longer open
//! 3. If a read failed transiently, stop here; the tracked set is untouched
//! 4. Commit the plan under the lock and deliver pending notifications
//!
//! Closed orders stay tracked until their notification has been delivered,
//! so a failed delivery is retried on the next cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::{OrderInfo, QueryOrdersResult};
use crate::chat::{ChatTransport, UserId};
use crate::exchange::{ExchangeClient, ExchangeError, MAX_QUERY_ORDERS};
use crate::models::{trim_zeros, OrderSide, OrderStatus, TrackedOrder};

/// Changes one successful cycle will make to the tracked set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CyclePlan {
    /// Open on the exchange but not tracked yet
    pub discovered: Vec<TrackedOrder>,
    /// Tracked orders that are now closed
    pub closed: Vec<String>,
    /// Tracked orders that were canceled or expired
    pub canceled: Vec<String>,
}

/// What a completed cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub discovered: usize,
    pub closed: usize,
    pub canceled: usize,
    pub notified: usize,
    pub undelivered: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A previous cycle was still running
    Skipped,
    Completed(CycleReport),
}

/// Tracked orders that are still open locally but missing from `open`.
pub fn vanished_orders(
    tracked: &HashMap<String, TrackedOrder>,
    open: &HashMap<String, OrderInfo>,
) -> Vec<String> {
    let mut ids: Vec<String> = tracked
        .values()
        .filter(|o| o.status == OrderStatus::Open && !open.contains_key(&o.order_id))
        .map(|o| o.order_id.clone())
        .collect();
    ids.sort();
    ids
}

/// Diff a tracked-set snapshot against the exchange's view.
///
/// `queried` holds the lookups for [`vanished_orders`]. A vanished order the
/// lookup does not know about counts as closed; one the lookup still reports
/// open is left alone until a later cycle.
pub fn plan_cycle(
    tracked: &HashMap<String, TrackedOrder>,
    open: &HashMap<String, OrderInfo>,
    queried: &QueryOrdersResult,
) -> CyclePlan {
    let mut plan = CyclePlan::default();

    let mut new_ids: Vec<&String> = open.keys().filter(|id| !tracked.contains_key(*id)).collect();
    new_ids.sort();
    for id in new_ids {
        plan.discovered.push(tracked_from_info(id, &open[id]));
    }

    for id in vanished_orders(tracked, open) {
        let status = queried
            .get(&id)
            .map(|info| OrderStatus::from_exchange(&info.status))
            .unwrap_or(OrderStatus::Closed);

        match status {
            OrderStatus::Closed => plan.closed.push(id),
            OrderStatus::Canceled => plan.canceled.push(id),
            OrderStatus::Open => {}
        }
    }

    plan
}

/// Build a tracked order from an exchange listing.
pub fn tracked_from_info(order_id: &str, info: &OrderInfo) -> TrackedOrder {
    let submitted_at = info
        .opentm
        .and_then(|secs| DateTime::from_timestamp(secs.trunc() as i64, (secs.fract() * 1e9) as u32))
        .unwrap_or_else(Utc::now);

    TrackedOrder {
        order_id: order_id.to_string(),
        pair: info.descr.pair.clone(),
        side: info.descr.side.parse::<OrderSide>().ok(),
        description: info.descr.order.clone(),
        submitted_at,
        status: OrderStatus::Open,
    }
}

/// Notification text for a closed order.
pub fn closed_message(order: &TrackedOrder) -> String {
    if order.description.is_empty() {
        format!("Trade executed: {}", order.order_id)
    } else {
        format!(
            "Trade executed: {}\n{}",
            order.order_id,
            trim_zeros(&order.description)
        )
    }
}

/// Owns the tracked order set.
pub struct OrderMonitor {
    exchange: ExchangeClient,
    chat: Arc<dyn ChatTransport>,
    user: UserId,
    tracked: Mutex<HashMap<String, TrackedOrder>>,
    cycle_guard: Mutex<()>,
    enabled: AtomicBool,
    notify_on_error: bool,
}

impl OrderMonitor {
    pub fn new(
        exchange: ExchangeClient,
        chat: Arc<dyn ChatTransport>,
        user: UserId,
        notify_on_error: bool,
    ) -> Self {
        Self {
            exchange,
            chat,
            user,
            tracked: Mutex::new(HashMap::new()),
            cycle_guard: Mutex::new(()),
            enabled: AtomicBool::new(true),
            notify_on_error,
        }
    }

    /// Start tracking a newly submitted order. An order already tracked is
    /// left as it is.
    pub async fn track(&self, order: TrackedOrder) {
        let mut tracked = self.tracked.lock().await;
        if tracked.contains_key(&order.order_id) {
            debug!(order_id = %order.order_id, "Order already tracked");
            return;
        }
        info!(order_id = %order.order_id, pair = %order.pair, "Tracking order");
        tracked.insert(order.order_id.clone(), order);
    }

    /// Copy of the tracked set.
    pub async fn snapshot(&self) -> HashMap<String, TrackedOrder> {
        self.tracked.lock().await.clone()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        info!(enabled = enabled, "Order monitor switched");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Run one poll cycle. Returns [`CycleOutcome::Skipped`] if another cycle
    /// is still in flight.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, ExchangeError> {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            debug!("Previous monitor cycle still running, skipping");
            return Ok(CycleOutcome::Skipped);
        };

        let snapshot = self.snapshot().await;

        let open = self.exchange.open_orders().await?;
        let vanished = vanished_orders(&snapshot, &open);
        let queried = self.look_up(&vanished).await?;

        let plan = plan_cycle(&snapshot, &open, &queried);
        let mut report = CycleReport {
            discovered: plan.discovered.len(),
            closed: plan.closed.len(),
            canceled: plan.canceled.len(),
            ..CycleReport::default()
        };

        let pending = self.commit(plan).await;

        for order in pending {
            match self
                .chat
                .send_message(self.user, &closed_message(&order), &[])
                .await
            {
                Ok(()) => {
                    self.tracked.lock().await.remove(&order.order_id);
                    info!(order_id = %order.order_id, "Closed order notified");
                    report.notified += 1;
                }
                Err(e) => {
                    warn!(order_id = %order.order_id, error = %e, "Failed to deliver notification, will retry");
                    report.undelivered += 1;
                }
            }
        }

        debug!(
            discovered = report.discovered,
            closed = report.closed,
            canceled = report.canceled,
            notified = report.notified,
            "Monitor cycle complete"
        );

        Ok(CycleOutcome::Completed(report))
    }

    /// Query vanished orders in batches the exchange accepts.
    ///
    /// A batch the exchange refuses is left out of the result, so its orders
    /// count as unknown to the lookup. A transient failure aborts the cycle.
    async fn look_up(&self, order_ids: &[String]) -> Result<QueryOrdersResult, ExchangeError> {
        let mut found = QueryOrdersResult::new();
        for batch in order_ids.chunks(MAX_QUERY_ORDERS) {
            match self.exchange.query_orders(batch).await {
                Ok(result) => found.extend(result),
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    warn!(orders = ?batch, error = %e, "Order lookup refused, treating orders as closed");
                }
            }
        }
        Ok(found)
    }

    /// Apply a plan and return the closed orders still awaiting notification.
    async fn commit(&self, plan: CyclePlan) -> Vec<TrackedOrder> {
        let mut tracked = self.tracked.lock().await;

        for order in plan.discovered {
            if !tracked.contains_key(&order.order_id) {
                info!(order_id = %order.order_id, pair = %order.pair, "Discovered open order");
                tracked.insert(order.order_id.clone(), order);
            }
        }

        for id in &plan.closed {
            if let Some(order) = tracked.get_mut(id) {
                order.transition(OrderStatus::Closed);
            }
        }

        for id in &plan.canceled {
            if let Some(order) = tracked.get_mut(id) {
                if order.transition(OrderStatus::Canceled) {
                    info!(order_id = %id, "Order canceled, no longer tracked");
                    tracked.remove(id);
                }
            }
        }

        let mut pending: Vec<TrackedOrder> = tracked
            .values()
            .filter(|o| o.status == OrderStatus::Closed)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        pending
    }

    /// Run a cycle and log its outcome; used by the background loop.
    async fn cycle_and_log(&self) {
        match self.run_cycle().await {
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Monitor cycle failed, tracked orders unchanged");
                if self.notify_on_error {
                    let text = format!("Order check failed: {}", e);
                    if let Err(send_err) = self.chat.send_message(self.user, &text, &[]).await {
                        warn!(error = %send_err, "Failed to report monitor error");
                    }
                }
            }
        }
    }

    /// Start the polling loop. The first cycle runs immediately, which also
    /// picks up orders already open on the account.
    ///
    /// Returns `None` when `every` is zero: the loop is disabled.
    pub fn spawn(self: Arc<Self>, every: Duration, shutdown: Arc<AtomicBool>) -> Option<JoinHandle<()>> {
        if every.is_zero() {
            info!("Order monitor disabled (interval 0)");
            self.set_enabled(false);
            return None;
        }

        info!(interval_secs = every.as_secs(), "Starting order monitor");

        Some(tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while !shutdown.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !self.is_enabled() {
                    continue;
                }
                // Each cycle runs in its own task so a hung call cannot hold up
                // the timer; overlapping cycles skip themselves.
                let monitor = self.clone();
                tokio::spawn(async move { monitor.cycle_and_log().await });
            }
        }))
    }
}
