//! The `statement` virtual table descriptor.
//!
//! ```sql
//! CREATE VIRTUAL TABLE split_date USING statement((
//!   SELECT strftime('%Y', :date) AS year,
//!          strftime('%m', :date) AS month,
//!          strftime('%d', :date) AS day
//! ));
//! SELECT * FROM split_date('2019-11-13');
//! ```

use std::str;

use rusqlite::ffi;
use rusqlite::vtab::{CreateVTab, IndexInfo, VTab, VTabConnection, VTabKind, sqlite3_vtab};
use stmtvtab_error::{Result, StatementVtabError};
use tracing::{debug, info, warn};

use crate::config::StatementModuleConfig;
use crate::cursor::StatementCursor;
use crate::metrics::{record_definition, record_infeasible_plan, record_plan};
use crate::planner::{PlanConstraint, PlanEstimate, plan_constraints};
use crate::schema::{StatementShape, build_create_statement};
use crate::stmt::PreparedStatement;

/// Index of the wrapped query among the module arguments; SQLite puts the
/// module, database and table names first.
const STATEMENT_ARG: usize = 3;

/// Shortest possible wrapped query: `(` + one byte + `)`.
const MIN_STATEMENT_LEN: usize = 3;

/// A table backed by one read-only query.
///
/// Columns `0..num_outputs` are the query's result columns; the following
/// `num_inputs` hidden columns are its parameters, in order.
#[repr(C)]
pub struct StatementTable {
    /// Base class. Must be first.
    base: sqlite3_vtab,
    /// Owning connection. Not owned; outlives the table.
    db: *mut ffi::sqlite3,
    sql: String,
    num_inputs: i32,
    num_outputs: i32,
    estimate: PlanEstimate,
}

/// Extract the query text from `(<query>)`.
fn parse_statement_arg<'a>(args: &[&'a [u8]]) -> Result<&'a str> {
    let arg = args
        .get(STATEMENT_ARG)
        .filter(|arg| arg.len() >= MIN_STATEMENT_LEN)
        .ok_or(StatementVtabError::NoStatement)?;
    let arg = str::from_utf8(arg).map_err(|_| StatementVtabError::NoStatement)?;
    arg.strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or(StatementVtabError::NotParenthesized)
}

fn count(n: usize) -> Result<i32> {
    i32::try_from(n).map_err(|_| StatementVtabError::TooManyConstraints { count: n })
}

impl StatementTable {
    /// Validate a table definition and derive its declaration.
    ///
    /// Used for both `xCreate` and `xConnect`; the returned SQL is handed to
    /// `sqlite3_declare_vtab`.
    pub(crate) fn from_definition(
        db: *mut ffi::sqlite3,
        config: &StatementModuleConfig,
        args: &[&[u8]],
    ) -> Result<(String, Self)> {
        let result = Self::build(db, config, args);
        match &result {
            Ok((_, table)) => {
                info!(
                    num_outputs = table.num_outputs,
                    num_inputs = table.num_inputs,
                    "statement vtab: table defined"
                );
            }
            Err(err) => {
                warn!(error = %err, "statement vtab: definition rejected");
            }
        }
        record_definition(result.is_ok());
        result
    }

    fn build(
        db: *mut ffi::sqlite3,
        config: &StatementModuleConfig,
        args: &[&[u8]],
    ) -> Result<(String, Self)> {
        let sql = parse_statement_arg(args)?;
        let stmt = PreparedStatement::prepare(db, sql)?;
        if !stmt.readonly() {
            return Err(StatementVtabError::NotReadOnly);
        }

        let shape = StatementShape::of(&stmt);
        let create = build_create_statement(&shape)?;
        debug!(declaration = %create, "statement vtab: declaring schema");

        let mut owned = String::new();
        owned
            .try_reserve_exact(sql.len())
            .map_err(|_| StatementVtabError::OutOfMemory)?;
        owned.push_str(sql);

        let table = Self {
            base: sqlite3_vtab::default(),
            db,
            sql: owned,
            num_inputs: count(shape.num_inputs())?,
            num_outputs: count(shape.num_outputs())?,
            estimate: config.plan_estimate(),
        };
        Ok((create, table))
    }

    /// The wrapped query, without its enclosing parentheses.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn num_inputs(&self) -> i32 {
        self.num_inputs
    }

    #[must_use]
    pub fn num_outputs(&self) -> i32 {
        self.num_outputs
    }

    pub(crate) fn db(&self) -> *mut ffi::sqlite3 {
        self.db
    }
}

unsafe impl<'vtab> VTab<'vtab> for StatementTable {
    type Aux = StatementModuleConfig;
    type Cursor = StatementCursor<'vtab>;

    fn connect(
        db: &mut VTabConnection,
        aux: Option<&StatementModuleConfig>,
        args: &[&[u8]],
    ) -> rusqlite::Result<(String, Self)> {
        let default_config;
        let config = match aux {
            Some(config) => config,
            None => {
                default_config = StatementModuleConfig::default();
                &default_config
            }
        };
        // SAFETY: the handle is only used while SQLite keeps the connection
        // open, which outlives every table defined on it.
        let raw = unsafe { db.handle() };
        Ok(Self::from_definition(raw, config, args)?)
    }

    fn best_index(&self, info: &mut IndexInfo) -> rusqlite::Result<()> {
        let constraints: Vec<PlanConstraint> = info
            .constraints()
            .map(|c| PlanConstraint::new(c.column(), c.operator().into(), c.is_usable()))
            .collect();

        let plan = match plan_constraints(&constraints, self.num_outputs, self.estimate) {
            Ok(plan) => plan,
            Err(err) => {
                if err.is_plan_rejection() {
                    record_infeasible_plan();
                }
                return Err(err.into());
            }
        };

        for (i, usage) in plan.usage.iter().enumerate() {
            if usage.argv_index > 0 {
                let mut slot = info.constraint_usage(i);
                slot.set_argv_index(usage.argv_index);
                slot.set_omit(usage.omit);
            }
        }
        if let Some(token) = &plan.param_map {
            info.set_idx_str(token);
        }
        info.set_order_by_consumed(plan.order_by_consumed);
        info.set_estimated_cost(plan.estimate.cost);
        info.set_estimated_rows(plan.estimate.rows);
        record_plan(plan.param_map.is_some());
        Ok(())
    }

    fn open(&'vtab mut self) -> rusqlite::Result<StatementCursor<'vtab>> {
        Ok(StatementCursor::open(self)?)
    }
}

impl CreateVTab<'_> for StatementTable {
    // Distinct create/connect: `statement` cannot be used without a
    // definition.
    const KIND: VTabKind = VTabKind::Default;
}
