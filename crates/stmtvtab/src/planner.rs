//! Constraint analysis for `xBestIndex`.
//!
//! The wrapped statement can only consume exact values for its parameters,
//! so the only plans a statement table accepts are ones where every
//! constraint on a hidden (parameter) column is a usable equality. Those
//! constraints become bound parameters and are omitted from SQLite's own
//! residual filtering; constraints on the visible output columns are left
//! entirely to SQLite.
//!
//! The planner works on [`PlanConstraint`] rather than on
//! `rusqlite::vtab::IndexInfo` so it can be exercised without a live
//! `xBestIndex` call.

use rusqlite::vtab::IndexConstraintOp;
use stmtvtab_error::{Result, StatementVtabError};
use tracing::debug;

use crate::codec::encode_param_map;

/// Widest parameter position the contiguity fast path can verify.
const FAST_PATH_MAX_COLUMNS: i32 = 64;

// ---------------------------------------------------------------------------
// Planner input/output types
// ---------------------------------------------------------------------------

/// Operator SQLite attached to a WHERE term it offers to push down.
///
/// Only [`ConstraintOp::Eq`] can feed a statement parameter; the rest are
/// kept so a rejected plan can be logged with the operator that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintOp {
    Eq,
    Gt,
    Le,
    Lt,
    Ge,
    Match,
    Like,
    Glob,
    Regexp,
    Ne,
    IsNot,
    IsNotNull,
    IsNull,
    Is,
    Limit,
    Offset,
    /// Operator supplied by an overloaded function (`xFindFunction`).
    Function(u8),
}

impl ConstraintOp {
    /// `LIMIT`/`OFFSET` describe the scan, not a column.
    #[must_use]
    pub const fn is_pseudo(self) -> bool {
        matches!(self, Self::Limit | Self::Offset)
    }
}

impl From<IndexConstraintOp> for ConstraintOp {
    fn from(op: IndexConstraintOp) -> Self {
        match op {
            IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_EQ => Self::Eq,
            IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_GT => Self::Gt,
            IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_LE => Self::Le,
            IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_LT => Self::Lt,
            IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_GE => Self::Ge,
            IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_MATCH => Self::Match,
            IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_LIKE => Self::Like,
            IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_GLOB => Self::Glob,
            IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_REGEXP => Self::Regexp,
            IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_NE => Self::Ne,
            IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_ISNOT => Self::IsNot,
            IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_ISNOTNULL => Self::IsNotNull,
            IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_ISNULL => Self::IsNull,
            IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_IS => Self::Is,
            IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_LIMIT => Self::Limit,
            IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_OFFSET => Self::Offset,
            IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_FUNCTION(code) => Self::Function(code),
        }
    }
}

/// One WHERE term as seen by [`plan_constraints`].
///
/// `column` counts result columns first, then parameter (hidden) columns;
/// SQLite uses `-1` for the rowid. `usable` is false when the term's value
/// depends on a table SQLite has not positioned yet in this join order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanConstraint {
    pub column: i32,
    pub op: ConstraintOp,
    pub usable: bool,
}

impl PlanConstraint {
    #[must_use]
    pub const fn new(column: i32, op: ConstraintOp, usable: bool) -> Self {
        Self { column, op, usable }
    }
}

/// What the statement does with one WHERE term.
///
/// A term on a parameter column is bound as `filter` argument `argv_index`
/// and, since the statement then only yields rows for that value, SQLite
/// skips re-checking it (`omit`). Terms on result columns keep the zero
/// default and are evaluated by SQLite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConstraintUsage {
    pub argv_index: i32,
    pub omit: bool,
}

/// Cost reported for every accepted plan.
///
/// The wrapped statement's real cost is opaque, so every plan reports the
/// same nominal estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanEstimate {
    pub cost: f64,
    pub rows: i64,
}

impl Default for PlanEstimate {
    fn default() -> Self {
        Self { cost: 1.0, rows: 1 }
    }
}

/// The outcome of one `xBestIndex` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintPlan {
    /// Parallel to the input constraints.
    pub usage: Vec<ConstraintUsage>,
    /// Encoded argument → parameter map, present only when argument order
    /// differs from parameter order.
    pub param_map: Option<String>,
    /// Always `false`: the statement's row order is not known.
    pub order_by_consumed: bool,
    pub estimate: PlanEstimate,
}

impl ConstraintPlan {
    /// Number of constraints bound as parameters.
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.usage.iter().filter(|u| u.argv_index > 0).count()
    }

    /// `true` when no parameter is bound by this plan.
    #[must_use]
    pub fn is_trivial(&self) -> bool {
        self.accepted() == 0
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Decide which constraints become bound parameters.
///
/// Columns `0..num_outputs` are the statement's result columns; columns
/// `num_outputs..` are its parameters in order. Returns
/// [`StatementVtabError::PlanInfeasible`] when a parameter column carries a
/// constraint that cannot be bound exactly.
pub fn plan_constraints(
    constraints: &[PlanConstraint],
    num_outputs: i32,
    estimate: PlanEstimate,
) -> Result<ConstraintPlan> {
    let mut usage = vec![ConstraintUsage::default(); constraints.len()];
    let mut accepted: i32 = 0;
    let mut col_max: i32 = 0;
    let mut used_cols: u64 = 0;

    for (constraint, slot) in constraints.iter().zip(usage.iter_mut()) {
        if constraint.op.is_pseudo() || constraint.column < num_outputs {
            continue;
        }
        // Anything but an exact value would mean scanning every result of
        // the statement for each candidate.
        if !constraint.usable || constraint.op != ConstraintOp::Eq {
            debug!(
                column = constraint.column,
                op = ?constraint.op,
                usable = constraint.usable,
                "statement vtab: rejecting plan"
            );
            return Err(StatementVtabError::PlanInfeasible);
        }

        let col_index = constraint.column - num_outputs;
        slot.argv_index = col_index + 1;
        slot.omit = true;

        col_max = col_max.max(col_index + 1);
        if col_index < FAST_PATH_MAX_COLUMNS {
            used_cols |= 1_u64 << col_index;
        }
        accepted += 1;
    }

    let mut plan = ConstraintPlan {
        usage,
        param_map: None,
        order_by_consumed: false,
        estimate,
    };

    // Contiguous parameters 1..=col_max arrive from SQLite already in binding
    // order; this is always the case for table-valued function calls.
    let required_cols = if col_max < FAST_PATH_MAX_COLUMNS {
        (1_u64 << col_max) - 1
    } else {
        u64::MAX
    };
    if accepted == 0
        || (col_max <= FAST_PATH_MAX_COLUMNS && used_cols == required_cols && accepted == col_max)
    {
        debug!(accepted, "statement vtab: positional plan");
        return Ok(plan);
    }

    // Otherwise renumber the arguments 1..=accepted in constraint order and
    // record which parameter each one binds.
    let mut positions = Vec::new();
    positions
        .try_reserve_exact(plan.accepted())
        .map_err(|_| StatementVtabError::OutOfMemory)?;
    for slot in plan.usage.iter_mut().filter(|u| u.argv_index > 0) {
        positions.push(slot.argv_index);
        slot.argv_index = i32::try_from(positions.len()).map_err(|_| {
            StatementVtabError::TooManyConstraints {
                count: positions.len(),
            }
        })?;
    }
    let token = encode_param_map(&positions)?;
    debug!(accepted, token = %token, "statement vtab: mapped plan");
    plan.param_map = Some(token);
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_param_index;

    fn eq(column: i32) -> PlanConstraint {
        PlanConstraint::new(column, ConstraintOp::Eq, true)
    }

    fn decoded(plan: &ConstraintPlan) -> Vec<i32> {
        let token = plan.param_map.as_deref().expect("plan has a token");
        (0..plan.accepted())
            .map(|slot| decode_param_index(slot, token.as_bytes()).unwrap())
            .collect()
    }

    #[test]
    fn no_constraints_is_trivial() {
        let plan = plan_constraints(&[], 3, PlanEstimate::default()).unwrap();
        assert!(plan.is_trivial());
        assert!(plan.param_map.is_none());
        assert!(!plan.order_by_consumed);
        assert!((plan.estimate.cost - 1.0).abs() < f64::EPSILON);
        assert_eq!(plan.estimate.rows, 1);
    }

    #[test]
    fn contiguous_constraints_need_no_token() {
        // Outputs 0..3, parameters at columns 3 and 4.
        let plan = plan_constraints(&[eq(3), eq(4)], 3, PlanEstimate::default()).unwrap();
        assert!(plan.param_map.is_none());
        assert_eq!(plan.usage[0], ConstraintUsage { argv_index: 1, omit: true });
        assert_eq!(plan.usage[1], ConstraintUsage { argv_index: 2, omit: true });
    }

    #[test]
    fn contiguous_in_any_constraint_order() {
        // Positions {1, 2} offered in reverse; SQLite orders args by
        // argv_index so no token is needed.
        let plan = plan_constraints(&[eq(2), eq(1)], 1, PlanEstimate::default()).unwrap();
        assert!(plan.param_map.is_none());
        assert_eq!(plan.usage[0].argv_index, 2);
        assert_eq!(plan.usage[1].argv_index, 1);
    }

    #[test]
    fn gap_in_parameters_needs_token() {
        // Only the third parameter is constrained.
        let plan = plan_constraints(&[eq(3 + 2)], 3, PlanEstimate::default()).unwrap();
        assert_eq!(plan.usage[0], ConstraintUsage { argv_index: 1, omit: true });
        assert_eq!(decoded(&plan), vec![3]);
    }

    #[test]
    fn token_slots_follow_constraint_order() {
        let plan = plan_constraints(&[eq(4), eq(0), eq(2)], 0, PlanEstimate::default()).unwrap();
        assert_eq!(plan.accepted(), 3);
        let argv: Vec<i32> = plan.usage.iter().map(|u| u.argv_index).collect();
        assert_eq!(argv, vec![1, 2, 3]);
        assert_eq!(decoded(&plan), vec![5, 1, 3]);
    }

    #[test]
    fn duplicate_constraints_use_token() {
        let plan = plan_constraints(&[eq(1), eq(1)], 1, PlanEstimate::default()).unwrap();
        assert_eq!(plan.accepted(), 2);
        assert_eq!(decoded(&plan), vec![1, 1]);
    }

    #[test]
    fn output_columns_are_left_to_sqlite() {
        let constraints = [
            PlanConstraint::new(0, ConstraintOp::Gt, true),
            PlanConstraint::new(1, ConstraintOp::Like, false),
            eq(2),
        ];
        let plan = plan_constraints(&constraints, 2, PlanEstimate::default()).unwrap();
        assert_eq!(plan.usage[0], ConstraintUsage::default());
        assert_eq!(plan.usage[1], ConstraintUsage::default());
        assert_eq!(plan.usage[2].argv_index, 1);
        assert!(plan.param_map.is_none());
    }

    #[test]
    fn rowid_constraint_is_left_to_sqlite() {
        let plan = plan_constraints(&[eq(-1)], 1, PlanEstimate::default()).unwrap();
        assert!(plan.is_trivial());
    }

    #[test]
    fn limit_and_offset_are_skipped() {
        let constraints = [
            PlanConstraint::new(5, ConstraintOp::Limit, true),
            PlanConstraint::new(5, ConstraintOp::Offset, false),
            eq(1),
        ];
        let plan = plan_constraints(&constraints, 1, PlanEstimate::default()).unwrap();
        assert_eq!(plan.accepted(), 1);
        assert!(plan.param_map.is_none());
    }

    #[test]
    fn range_on_parameter_is_infeasible() {
        let constraints = [PlanConstraint::new(1, ConstraintOp::Gt, true)];
        let err = plan_constraints(&constraints, 1, PlanEstimate::default()).unwrap_err();
        assert_eq!(err, StatementVtabError::PlanInfeasible);
    }

    #[test]
    fn unusable_equality_is_infeasible() {
        let constraints = [eq(1), PlanConstraint::new(2, ConstraintOp::Eq, false)];
        let err = plan_constraints(&constraints, 1, PlanEstimate::default()).unwrap_err();
        assert!(err.is_plan_rejection());
    }

    #[test]
    fn sixty_four_contiguous_parameters_take_fast_path() {
        let constraints: Vec<_> = (0..64).map(eq).collect();
        let plan = plan_constraints(&constraints, 0, PlanEstimate::default()).unwrap();
        assert!(plan.param_map.is_none());
        assert_eq!(plan.usage[63].argv_index, 64);
    }

    #[test]
    fn wide_contiguous_parameters_fall_back_to_token() {
        let constraints: Vec<_> = (0..70).map(eq).collect();
        let plan = plan_constraints(&constraints, 0, PlanEstimate::default()).unwrap();
        assert_eq!(decoded(&plan), (1..=70).collect::<Vec<_>>());
    }

    #[test]
    fn estimate_is_passed_through() {
        let estimate = PlanEstimate {
            cost: 25.0,
            rows: 10,
        };
        let plan = plan_constraints(&[], 0, estimate).unwrap();
        assert_eq!(plan.estimate, estimate);
    }

    #[test]
    fn maps_rusqlite_operators() {
        assert_eq!(
            ConstraintOp::from(IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_EQ),
            ConstraintOp::Eq
        );
        assert_eq!(
            ConstraintOp::from(IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_LIMIT),
            ConstraintOp::Limit
        );
        assert_eq!(
            ConstraintOp::from(IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_FUNCTION(150)),
            ConstraintOp::Function(150)
        );
        assert!(ConstraintOp::Offset.is_pseudo());
        assert!(!ConstraintOp::Eq.is_pseudo());
    }
}
