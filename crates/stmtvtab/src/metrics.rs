//! Process-wide counters for the statement module.

use std::sync::atomic::{AtomicU64, Ordering};

static TABLES_DEFINED: AtomicU64 = AtomicU64::new(0);
static DEFINITIONS_REJECTED: AtomicU64 = AtomicU64::new(0);
static PLANS: AtomicU64 = AtomicU64::new(0);
static TOKEN_PLANS: AtomicU64 = AtomicU64::new(0);
static INFEASIBLE_PLANS: AtomicU64 = AtomicU64::new(0);
static CURSORS_OPENED: AtomicU64 = AtomicU64::new(0);
static FILTERS: AtomicU64 = AtomicU64::new(0);
static ROWS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementVtabMetricsSnapshot {
    /// Descriptors built by `xCreate` or `xConnect`.
    pub tables_defined: u64,
    pub definitions_rejected: u64,
    /// Accepted `xBestIndex` plans.
    pub plans: u64,
    /// Accepted plans that needed a parameter map token.
    pub token_plans: u64,
    pub infeasible_plans: u64,
    pub cursors_opened: u64,
    pub filters: u64,
    /// Rows produced across all cursors.
    pub rows: u64,
}

impl StatementVtabMetricsSnapshot {
    pub fn total_plans(&self) -> u64 {
        self.plans + self.infeasible_plans
    }
}

pub fn metrics_snapshot() -> StatementVtabMetricsSnapshot {
    StatementVtabMetricsSnapshot {
        tables_defined: TABLES_DEFINED.load(Ordering::Relaxed),
        definitions_rejected: DEFINITIONS_REJECTED.load(Ordering::Relaxed),
        plans: PLANS.load(Ordering::Relaxed),
        token_plans: TOKEN_PLANS.load(Ordering::Relaxed),
        infeasible_plans: INFEASIBLE_PLANS.load(Ordering::Relaxed),
        cursors_opened: CURSORS_OPENED.load(Ordering::Relaxed),
        filters: FILTERS.load(Ordering::Relaxed),
        rows: ROWS.load(Ordering::Relaxed),
    }
}

pub fn reset_metrics() {
    TABLES_DEFINED.store(0, Ordering::Relaxed);
    DEFINITIONS_REJECTED.store(0, Ordering::Relaxed);
    PLANS.store(0, Ordering::Relaxed);
    TOKEN_PLANS.store(0, Ordering::Relaxed);
    INFEASIBLE_PLANS.store(0, Ordering::Relaxed);
    CURSORS_OPENED.store(0, Ordering::Relaxed);
    FILTERS.store(0, Ordering::Relaxed);
    ROWS.store(0, Ordering::Relaxed);
}

pub(crate) fn record_definition(accepted: bool) {
    if accepted {
        TABLES_DEFINED.fetch_add(1, Ordering::Relaxed);
    } else {
        DEFINITIONS_REJECTED.fetch_add(1, Ordering::Relaxed);
    }
}

pub(crate) fn record_plan(with_token: bool) {
    PLANS.fetch_add(1, Ordering::Relaxed);
    if with_token {
        TOKEN_PLANS.fetch_add(1, Ordering::Relaxed);
    }
}

pub(crate) fn record_infeasible_plan() {
    INFEASIBLE_PLANS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_cursor_opened() {
    CURSORS_OPENED.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_filter() {
    FILTERS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_row() {
    ROWS.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Counters are process-wide and other tests run concurrently, so only
    // lower bounds are asserted.
    #[test]
    fn recorders_advance_counters() {
        let before = metrics_snapshot();
        record_definition(true);
        record_definition(false);
        record_plan(true);
        record_infeasible_plan();
        record_cursor_opened();
        record_filter();
        record_row();
        let after = metrics_snapshot();
        assert!(after.tables_defined > before.tables_defined);
        assert!(after.definitions_rejected > before.definitions_rejected);
        assert!(after.plans > before.plans);
        assert!(after.token_plans > before.token_plans);
        assert!(after.infeasible_plans > before.infeasible_plans);
        assert!(after.cursors_opened > before.cursors_opened);
        assert!(after.filters > before.filters);
        assert!(after.rows > before.rows);
        assert!(after.total_plans() >= 2);
    }
}
