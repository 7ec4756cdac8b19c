//! Owned prepared statement handle over the raw SQLite C API.
//!
//! A statement table's cursor steps its statement one row at a time across
//! separate `xFilter`/`xNext` callbacks, which `rusqlite::Statement` cannot
//! express without borrowing itself. [`PreparedStatement`] is the minimal
//! owning wrapper: compile, bind, step, read the current row, finalize on
//! drop.
//!
//! Compilation happens under the connection mutex ([`DbMutexGuard`]) so the
//! message read back from `sqlite3_errmsg` belongs to the failed prepare and
//! not to a concurrent call on the same connection.

use std::ffi::{CStr, c_char, c_int};
use std::ptr::{self, NonNull};
use std::slice;

use rusqlite::ffi;
use rusqlite::types::ValueRef;
use stmtvtab_error::{ErrorCode, Result, StatementVtabError};

/// Outcome of a successful `sqlite3_step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Row,
    Done,
}

// ---------------------------------------------------------------------------
// Connection mutex
// ---------------------------------------------------------------------------

/// Holds `sqlite3_db_mutex(db)` for its lifetime.
///
/// The connection mutex is recursive, so entering it from inside a callback
/// SQLite is already running on this connection does not deadlock. In
/// single-thread builds the mutex is NULL and both calls are no-ops.
pub(crate) struct DbMutexGuard {
    mutex: *mut ffi::sqlite3_mutex,
}

impl DbMutexGuard {
    pub(crate) fn enter(db: *mut ffi::sqlite3) -> Self {
        // SAFETY: `db` is a live connection handle supplied by SQLite.
        let mutex = unsafe { ffi::sqlite3_db_mutex(db) };
        // SAFETY: sqlite3_mutex_enter accepts NULL.
        unsafe { ffi::sqlite3_mutex_enter(mutex) };
        Self { mutex }
    }
}

impl Drop for DbMutexGuard {
    fn drop(&mut self) {
        // SAFETY: entered in `enter`; sqlite3_mutex_leave accepts NULL.
        unsafe { ffi::sqlite3_mutex_leave(self.mutex) };
    }
}

/// Copy the connection's current error message.
///
/// # Safety
///
/// `db` must be a live connection handle.
unsafe fn last_error_message(db: *mut ffi::sqlite3) -> String {
    // SAFETY: guaranteed by the caller.
    let msg = unsafe { ffi::sqlite3_errmsg(db) };
    if msg.is_null() {
        return "unknown error".to_owned();
    }
    // SAFETY: sqlite3_errmsg returns a NUL-terminated string owned by SQLite.
    unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
}

/// Copy a nullable C string returned by SQLite.
///
/// # Safety
///
/// `ptr` must be NULL or point to a NUL-terminated string.
unsafe fn owned_cstr(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        // SAFETY: guaranteed by the caller.
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

fn c_len(len: usize) -> Result<c_int> {
    c_int::try_from(len).map_err(|_| {
        StatementVtabError::execution(ErrorCode::TooBig as i32, "string or blob too big")
    })
}

// ---------------------------------------------------------------------------
// PreparedStatement
// ---------------------------------------------------------------------------

/// A compiled statement, finalized exactly once when dropped.
#[derive(Debug)]
pub struct PreparedStatement {
    raw: NonNull<ffi::sqlite3_stmt>,
}

impl PreparedStatement {
    /// Compile `sql` against `db`.
    ///
    /// SQL that compiles to nothing (only whitespace or comments) is reported
    /// as [`StatementVtabError::NoStatement`].
    pub(crate) fn prepare(db: *mut ffi::sqlite3, sql: &str) -> Result<Self> {
        let len = c_len(sql.len())?;
        let mut raw = ptr::null_mut();
        let _lock = DbMutexGuard::enter(db);
        // SAFETY: `db` is live; `sql` is valid for `len` bytes and need not
        // be NUL-terminated since its length is given.
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(db, sql.as_ptr().cast(), len, &mut raw, ptr::null_mut())
        };
        if rc != ffi::SQLITE_OK {
            // SAFETY: `db` is live and the mutex is still held.
            let message = unsafe { last_error_message(db) };
            return Err(StatementVtabError::compile(rc, message));
        }
        NonNull::new(raw)
            .map(|raw| Self { raw })
            .ok_or(StatementVtabError::NoStatement)
    }

    fn ptr(&self) -> *mut ffi::sqlite3_stmt {
        self.raw.as_ptr()
    }

    fn db(&self) -> *mut ffi::sqlite3 {
        // SAFETY: the statement is live.
        unsafe { ffi::sqlite3_db_handle(self.ptr()) }
    }

    fn execution_error(&self, rc: c_int) -> StatementVtabError {
        // SAFETY: the owning connection outlives its statements.
        StatementVtabError::execution(rc, unsafe { last_error_message(self.db()) })
    }

    /// Whether the statement makes no direct changes to the database.
    #[must_use]
    pub fn readonly(&self) -> bool {
        // SAFETY: the statement is live.
        unsafe { ffi::sqlite3_stmt_readonly(self.ptr()) != 0 }
    }

    #[must_use]
    pub fn column_count(&self) -> i32 {
        // SAFETY: the statement is live.
        unsafe { ffi::sqlite3_column_count(self.ptr()) }
    }

    /// Result column name; `None` when SQLite cannot produce one.
    #[must_use]
    pub fn column_name(&self, col: i32) -> Option<String> {
        // SAFETY: the statement is live; the returned string is copied
        // before any further call on the statement.
        unsafe { owned_cstr(ffi::sqlite3_column_name(self.ptr(), col)) }
    }

    /// Declared type of a result column that maps directly onto a table
    /// column; `None` for expressions.
    #[must_use]
    pub fn column_decltype(&self, col: i32) -> Option<String> {
        // SAFETY: as for `column_name`.
        unsafe { owned_cstr(ffi::sqlite3_column_decltype(self.ptr(), col)) }
    }

    /// Largest parameter index used by the statement.
    #[must_use]
    pub fn parameter_count(&self) -> i32 {
        // SAFETY: the statement is live.
        unsafe { ffi::sqlite3_bind_parameter_count(self.ptr()) }
    }

    /// Parameter name including its sigil (`:a`, `@a`, `$a`, `?3`); `None`
    /// for a plain `?`. `index` is 1-based.
    #[must_use]
    pub fn parameter_name(&self, index: i32) -> Option<String> {
        // SAFETY: as for `column_name`.
        unsafe { owned_cstr(ffi::sqlite3_bind_parameter_name(self.ptr(), index)) }
    }

    /// Rewind to before the first row. Bindings are kept.
    pub fn reset(&mut self) {
        // The return value repeats the last step's error, already reported.
        // SAFETY: the statement is live.
        unsafe { ffi::sqlite3_reset(self.ptr()) };
    }

    /// Set every parameter back to NULL.
    pub fn clear_bindings(&mut self) {
        // SAFETY: the statement is live.
        unsafe { ffi::sqlite3_clear_bindings(self.ptr()) };
    }

    /// Bind `value` to the 1-based parameter `index`. Text and blobs are
    /// copied by SQLite.
    pub fn bind(&mut self, index: i32, value: ValueRef<'_>) -> Result<()> {
        let stmt = self.ptr();
        // SAFETY: the statement is live; text/blob pointers are valid for the
        // given length and SQLITE_TRANSIENT makes SQLite copy them.
        let rc = unsafe {
            match value {
                ValueRef::Null => ffi::sqlite3_bind_null(stmt, index),
                ValueRef::Integer(i) => ffi::sqlite3_bind_int64(stmt, index, i),
                ValueRef::Real(r) => ffi::sqlite3_bind_double(stmt, index, r),
                ValueRef::Text(text) if text.is_empty() => {
                    ffi::sqlite3_bind_text(stmt, index, c"".as_ptr(), 0, ffi::SQLITE_TRANSIENT())
                }
                ValueRef::Text(text) => ffi::sqlite3_bind_text(
                    stmt,
                    index,
                    text.as_ptr().cast(),
                    c_len(text.len())?,
                    ffi::SQLITE_TRANSIENT(),
                ),
                ValueRef::Blob(blob) if blob.is_empty() => {
                    ffi::sqlite3_bind_zeroblob(stmt, index, 0)
                }
                ValueRef::Blob(blob) => ffi::sqlite3_bind_blob(
                    stmt,
                    index,
                    blob.as_ptr().cast(),
                    c_len(blob.len())?,
                    ffi::SQLITE_TRANSIENT(),
                ),
            }
        };
        if rc == ffi::SQLITE_OK {
            Ok(())
        } else {
            Err(self.execution_error(rc))
        }
    }

    /// Advance to the next row.
    pub fn step(&mut self) -> Result<Step> {
        // SAFETY: the statement is live.
        match unsafe { ffi::sqlite3_step(self.ptr()) } {
            ffi::SQLITE_ROW => Ok(Step::Row),
            ffi::SQLITE_DONE => Ok(Step::Done),
            rc => Err(self.execution_error(rc)),
        }
    }

    /// Value of column `col` in the current row.
    ///
    /// The borrow ends before the statement can be stepped, reset or
    /// finalized, which is exactly how long SQLite keeps the data valid.
    #[must_use]
    pub fn column_value(&self, col: i32) -> ValueRef<'_> {
        let stmt = self.ptr();
        // SAFETY: the statement is live; pointers returned by
        // sqlite3_column_text/blob stay valid until the next step/reset, which
        // needs `&mut self`. `_bytes` is read after the pointer as SQLite
        // recommends.
        unsafe {
            match ffi::sqlite3_column_type(stmt, col) {
                ffi::SQLITE_INTEGER => ValueRef::Integer(ffi::sqlite3_column_int64(stmt, col)),
                ffi::SQLITE_FLOAT => ValueRef::Real(ffi::sqlite3_column_double(stmt, col)),
                ffi::SQLITE_TEXT => {
                    let text = ffi::sqlite3_column_text(stmt, col);
                    let len = usize::try_from(ffi::sqlite3_column_bytes(stmt, col)).unwrap_or(0);
                    if text.is_null() || len == 0 {
                        ValueRef::Text(&[])
                    } else {
                        ValueRef::Text(slice::from_raw_parts(text, len))
                    }
                }
                ffi::SQLITE_BLOB => {
                    let blob = ffi::sqlite3_column_blob(stmt, col);
                    let len = usize::try_from(ffi::sqlite3_column_bytes(stmt, col)).unwrap_or(0);
                    if blob.is_null() || len == 0 {
                        ValueRef::Blob(&[])
                    } else {
                        ValueRef::Blob(slice::from_raw_parts(blob.cast::<u8>(), len))
                    }
                }
                _ => ValueRef::Null,
            }
        }
    }
}

impl Drop for PreparedStatement {
    fn drop(&mut self) {
        // SAFETY: `raw` came from sqlite3_prepare_v2 and is finalized only here.
        unsafe { ffi::sqlite3_finalize(self.ptr()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn handle(conn: &Connection) -> *mut ffi::sqlite3 {
        // SAFETY: the connection outlives every statement in these tests.
        unsafe { conn.handle() }
    }

    #[test]
    fn prepare_reports_engine_message() {
        let conn = Connection::open_in_memory().unwrap();
        let err = PreparedStatement::prepare(handle(&conn), "SELEC 1").unwrap_err();
        match err {
            StatementVtabError::Compile { code, message } => {
                assert_eq!(code, ffi::SQLITE_ERROR);
                assert!(message.contains("syntax error"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_sql_is_no_statement() {
        let conn = Connection::open_in_memory().unwrap();
        let err = PreparedStatement::prepare(handle(&conn), "  -- nothing").unwrap_err();
        assert_eq!(err, StatementVtabError::NoStatement);
    }

    #[test]
    fn describes_columns_and_parameters() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t(a INTEGER, b TEXT)").unwrap();
        let stmt =
            PreparedStatement::prepare(handle(&conn), "SELECT a, b || ?, :x FROM t WHERE a = ?5")
                .unwrap();
        assert!(stmt.readonly());
        assert_eq!(stmt.column_count(), 3);
        assert_eq!(stmt.column_name(0).as_deref(), Some("a"));
        assert_eq!(stmt.column_decltype(0).as_deref(), Some("INTEGER"));
        assert_eq!(stmt.column_decltype(1), None);
        assert_eq!(stmt.parameter_count(), 5);
        assert_eq!(stmt.parameter_name(1), None);
        assert_eq!(stmt.parameter_name(2).as_deref(), Some(":x"));
        assert_eq!(stmt.parameter_name(5).as_deref(), Some("?5"));
    }

    #[test]
    fn writes_are_not_readonly() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t(a)").unwrap();
        let stmt = PreparedStatement::prepare(handle(&conn), "INSERT INTO t VALUES (1)").unwrap();
        assert!(!stmt.readonly());
    }

    #[test]
    fn bind_step_and_read_each_type() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt =
            PreparedStatement::prepare(handle(&conn), "SELECT ?1, ?2, ?3, ?4, ?5, ?6").unwrap();
        stmt.bind(1, ValueRef::Integer(7)).unwrap();
        stmt.bind(2, ValueRef::Real(1.5)).unwrap();
        stmt.bind(3, ValueRef::Text(b"hi")).unwrap();
        stmt.bind(4, ValueRef::Blob(&[1, 2])).unwrap();
        stmt.bind(5, ValueRef::Text(b"")).unwrap();
        assert_eq!(stmt.step().unwrap(), Step::Row);
        assert_eq!(stmt.column_value(0), ValueRef::Integer(7));
        assert_eq!(stmt.column_value(1), ValueRef::Real(1.5));
        assert_eq!(stmt.column_value(2), ValueRef::Text(b"hi"));
        assert_eq!(stmt.column_value(3), ValueRef::Blob(&[1, 2]));
        assert_eq!(stmt.column_value(4), ValueRef::Text(b""));
        assert_eq!(stmt.column_value(5), ValueRef::Null);
        assert_eq!(stmt.step().unwrap(), Step::Done);
    }

    #[test]
    fn clear_bindings_resets_to_null() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = PreparedStatement::prepare(handle(&conn), "SELECT ?1").unwrap();
        stmt.bind(1, ValueRef::Integer(1)).unwrap();
        assert_eq!(stmt.step().unwrap(), Step::Row);
        stmt.reset();
        stmt.clear_bindings();
        assert_eq!(stmt.step().unwrap(), Step::Row);
        assert_eq!(stmt.column_value(0), ValueRef::Null);
    }

    #[test]
    fn bind_out_of_range_is_execution_error() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = PreparedStatement::prepare(handle(&conn), "SELECT ?1").unwrap();
        let err = stmt.bind(2, ValueRef::Integer(1)).unwrap_err();
        assert!(matches!(
            err,
            StatementVtabError::Execution { code, .. } if code == ffi::SQLITE_RANGE
        ));
    }

    #[test]
    fn step_error_carries_engine_message() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt =
            PreparedStatement::prepare(handle(&conn), "SELECT abs(-9223372036854775807 - 1)")
                .unwrap();
        let err = stmt.step().unwrap_err();
        assert!(matches!(err, StatementVtabError::Execution { .. }));
        assert!(err.to_string().contains("integer overflow"), "{err}");
    }

    #[test]
    fn mutex_guard_is_reentrant() {
        let conn = Connection::open_in_memory().unwrap();
        let outer = DbMutexGuard::enter(handle(&conn));
        let stmt = PreparedStatement::prepare(handle(&conn), "SELECT 1").unwrap();
        drop(outer);
        assert_eq!(stmt.column_count(), 1);
    }
}
