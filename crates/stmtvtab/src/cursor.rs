//! Row cursor over one execution of the wrapped statement.
//!
//! Each cursor owns its own compiled copy of the statement, so any number of
//! cursors on the same table (self-joins, correlated subqueries) step
//! independently.

use std::ffi::c_int;

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::vtab::{Context, Filters, VTabCursor, sqlite3_vtab_cursor};
use stmtvtab_error::{Result, StatementVtabError};
use tracing::trace;

use crate::codec::decode_param_index;
use crate::metrics::{record_cursor_opened, record_filter, record_row};
use crate::stmt::{PreparedStatement, Step};
use crate::table::StatementTable;

/// Where a cursor is in its current execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Opened; no execution started yet.
    Opened,
    /// Positioned on a row.
    Iterating,
    /// The last execution produced no further rows, or failed.
    Exhausted,
}

#[repr(C)]
pub struct StatementCursor<'vtab> {
    /// Base class. Must be first.
    base: sqlite3_vtab_cursor,
    table: &'vtab StatementTable,
    stmt: PreparedStatement,
    state: CursorState,
    rowid: i64,
    /// Arguments bound by the last `filter`.
    bound_argc: usize,
    /// Value bound to each parameter slot by the last `filter`.
    bound: Vec<Option<Value>>,
}

impl<'vtab> StatementCursor<'vtab> {
    pub(crate) fn open(table: &'vtab StatementTable) -> Result<Self> {
        let stmt = PreparedStatement::prepare(table.db(), table.sql())?;
        let slots = usize::try_from(table.num_inputs()).unwrap_or(0);
        let mut bound = Vec::new();
        bound
            .try_reserve_exact(slots)
            .map_err(|_| StatementVtabError::OutOfMemory)?;
        bound.resize(slots, None);
        record_cursor_opened();
        Ok(Self {
            base: sqlite3_vtab_cursor::default(),
            table,
            stmt,
            state: CursorState::Opened,
            rowid: 0,
            bound_argc: 0,
            bound,
        })
    }

    /// Start a fresh execution with `args` bound.
    ///
    /// Without a `param_map`, argument `i` binds parameter `i + 1`; with one,
    /// it binds the parameter recorded in slot `i` of the map.
    pub fn rebind<'a>(
        &mut self,
        param_map: Option<&str>,
        args: impl IntoIterator<Item = ValueRef<'a>>,
    ) -> Result<()> {
        record_filter();
        self.stmt.reset();
        self.stmt.clear_bindings();
        self.bound.fill(None);
        self.bound_argc = 0;
        self.rowid = 0;
        self.state = CursorState::Exhausted;

        for (i, value) in args.into_iter().enumerate() {
            let position = match param_map {
                Some(token) => decode_param_index(i, token.as_bytes())?,
                None => i32::try_from(i + 1)
                    .map_err(|_| StatementVtabError::TooManyConstraints { count: i + 1 })?,
            };
            self.stmt.bind(position, value)?;
            if let Some(slot) = usize::try_from(position - 1)
                .ok()
                .and_then(|slot| self.bound.get_mut(slot))
            {
                *slot = Some(Value::from(value));
            }
            self.bound_argc += 1;
        }

        trace!(
            argc = self.bound_argc,
            mapped = param_map.is_some(),
            "statement vtab: filter"
        );
        self.step_first()
    }

    fn step_first(&mut self) -> Result<()> {
        match self.stmt.step()? {
            Step::Row => {
                self.state = CursorState::Iterating;
                self.rowid = 1;
                record_row();
            }
            Step::Done => self.state = CursorState::Exhausted,
        }
        Ok(())
    }

    /// Move to the next row. Does nothing once the execution is exhausted.
    pub fn advance(&mut self) -> Result<()> {
        if self.state != CursorState::Iterating {
            return Ok(());
        }
        match self.stmt.step() {
            Ok(Step::Row) => {
                self.rowid += 1;
                record_row();
                trace!(rowid = self.rowid, "statement vtab: next");
            }
            Ok(Step::Done) => self.state = CursorState::Exhausted,
            Err(err) => {
                self.state = CursorState::Exhausted;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Value of column `col` for the current row.
    ///
    /// Result columns read from the statement; hidden parameter columns echo
    /// the value bound to that parameter, or NULL when none was.
    #[must_use]
    pub fn value(&self, col: i32) -> ValueRef<'_> {
        let num_outputs = self.table.num_outputs();
        if col < num_outputs {
            if col < 0 || self.state != CursorState::Iterating {
                return ValueRef::Null;
            }
            return self.stmt.column_value(col);
        }
        usize::try_from(col - num_outputs)
            .ok()
            .and_then(|slot| self.bound.get(slot))
            .and_then(Option::as_ref)
            .map_or(ValueRef::Null, ValueRef::from)
    }

    #[must_use]
    pub fn state(&self) -> CursorState {
        self.state
    }

    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.state != CursorState::Iterating
    }

    #[must_use]
    pub fn current_rowid(&self) -> i64 {
        self.rowid
    }

    /// Number of arguments bound by the last `filter`.
    #[must_use]
    pub fn bound_argc(&self) -> usize {
        self.bound_argc
    }
}

unsafe impl VTabCursor for StatementCursor<'_> {
    fn filter(
        &mut self,
        _idx_num: c_int,
        idx_str: Option<&str>,
        args: &Filters<'_>,
    ) -> rusqlite::Result<()> {
        Ok(self.rebind(idx_str, args.iter())?)
    }

    fn next(&mut self) -> rusqlite::Result<()> {
        Ok(self.advance()?)
    }

    fn eof(&self) -> bool {
        self.is_eof()
    }

    fn column(&self, ctx: &mut Context, i: c_int) -> rusqlite::Result<()> {
        ctx.set_result(&ToSqlOutput::Borrowed(self.value(i)))
    }

    fn rowid(&self) -> rusqlite::Result<i64> {
        Ok(self.rowid)
    }
}
