//! `statement`: a SQLite virtual table module that exposes a parameterized,
//! read-only query as a table or table-valued function.
//!
//! ```sql
//! CREATE VIRTUAL TABLE split_date USING statement((
//!   SELECT strftime('%Y', :date) AS year,
//!          strftime('%m', :date) AS month,
//!          strftime('%d', :date) AS day
//! ));
//! SELECT * FROM split_date('2019-11-13');
//! SELECT year FROM split_date WHERE date = '2019-11-13';
//! ```
//!
//! The query's result columns become the table's columns; each of its
//! parameters becomes a hidden column. Equality constraints on hidden columns
//! (including table-valued function arguments) are bound as parameters, and
//! every execution of the query produces the rows for one set of bindings.
//!
//! Tracing: `info!` on table definition and module registration, `warn!` on
//! rejected definitions, `debug!` per plan, `trace!` per filter and row.

#![allow(unsafe_code, clippy::borrow_as_ptr)]

pub mod codec;
pub mod config;
pub mod cursor;
pub mod metrics;
pub mod planner;
pub mod schema;
pub mod stmt;
pub mod table;

use rusqlite::Connection;
use rusqlite::vtab::read_only_module;
use tracing::{info, warn};

pub use config::StatementModuleConfig;
pub use cursor::{CursorState, StatementCursor};
pub use metrics::{StatementVtabMetricsSnapshot, metrics_snapshot, reset_metrics};
pub use planner::{ConstraintOp, ConstraintPlan, PlanConstraint, PlanEstimate, plan_constraints};
pub use stmtvtab_error::{ErrorCode, Result, StatementVtabError};
pub use table::StatementTable;

/// Module name used by [`register`].
pub const DEFAULT_MODULE_NAME: &str = "statement";

/// Oldest SQLite release the module supports (3.24.0), in
/// `sqlite3_libversion_number` form.
pub const MIN_SQLITE_VERSION: i32 = 3_024_000;

/// Reject SQLite versions older than [`MIN_SQLITE_VERSION`].
pub fn check_sqlite_version(found: i32) -> Result<()> {
    if found < MIN_SQLITE_VERSION {
        return Err(StatementVtabError::UnsupportedVersion { found });
    }
    Ok(())
}

/// Register the `statement` module on `conn` with default settings.
pub fn register(conn: &Connection) -> rusqlite::Result<()> {
    register_with_config(conn, StatementModuleConfig::default())
}

/// Register the module on `conn` under `config.module_name`.
///
/// Nothing is registered when the linked SQLite is too old.
pub fn register_with_config(
    conn: &Connection,
    config: StatementModuleConfig,
) -> rusqlite::Result<()> {
    let version = rusqlite::version_number();
    if let Err(err) = check_sqlite_version(version) {
        warn!(version, error = %err, "statement vtab: unsupported SQLite version");
        return Err(err.into());
    }
    let name = config.module_name.clone();
    conn.create_module(
        name.as_str(),
        read_only_module::<StatementTable>(),
        Some(config),
    )?;
    info!(module = %name, sqlite_version = version, "statement vtab: module registered");
    Ok(())
}
