use crate::planner::PlanEstimate;

/// Registration-time settings for the statement module.
///
/// Passed to SQLite as the module's client data and copied into every table
/// defined with it.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementModuleConfig {
    /// Name used in `CREATE VIRTUAL TABLE ... USING <name>(...)`.
    pub module_name: String,
    /// Cost reported for every accepted plan.
    pub estimated_cost: f64,
    /// Row count reported for every accepted plan.
    pub estimated_rows: i64,
}

impl Default for StatementModuleConfig {
    fn default() -> Self {
        let estimate = PlanEstimate::default();
        Self {
            module_name: crate::DEFAULT_MODULE_NAME.to_owned(),
            estimated_cost: estimate.cost,
            estimated_rows: estimate.rows,
        }
    }
}

impl StatementModuleConfig {
    #[must_use]
    pub fn with_module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = name.into();
        self
    }

    #[must_use]
    pub fn with_estimate(mut self, cost: f64, rows: i64) -> Self {
        self.estimated_cost = cost;
        self.estimated_rows = rows;
        self
    }

    #[must_use]
    pub fn plan_estimate(&self) -> PlanEstimate {
        PlanEstimate {
            cost: self.estimated_cost,
            rows: self.estimated_rows,
        }
    }
}
