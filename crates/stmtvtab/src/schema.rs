//! Table declaration derived from a compiled statement.
//!
//! Result columns become visible columns with the statement's declared
//! types; parameters become `hidden` columns after them, in parameter order,
//! so `tbl(a, b)` binds `a` to parameter 1 and `b` to parameter 2.

use stmtvtab_error::{Result, StatementVtabError};

use crate::stmt::PreparedStatement;

/// Sigils SQLite accepts in front of a parameter name.
const PARAM_SIGILS: [char; 4] = [':', '@', '$', '?'];

/// The column and parameter layout of a wrapped statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementShape {
    /// `(name, declared type)` per result column. A `None` name means
    /// SQLite could not produce one.
    pub columns: Vec<(Option<String>, Option<String>)>,
    /// Name per parameter position, sigil included; `None` when anonymous.
    pub parameters: Vec<Option<String>>,
}

impl StatementShape {
    /// Describe `stmt`.
    #[must_use]
    pub fn of(stmt: &PreparedStatement) -> Self {
        let columns = (0..stmt.column_count())
            .map(|i| (stmt.column_name(i), stmt.column_decltype(i)))
            .collect();
        let parameters = (1..=stmt.parameter_count())
            .map(|i| stmt.parameter_name(i))
            .collect();
        Self {
            columns,
            parameters,
        }
    }

    pub fn num_outputs(&self) -> usize {
        self.columns.len()
    }

    pub fn num_inputs(&self) -> usize {
        self.parameters.len()
    }
}

/// Append `value` as a single-quoted SQL string literal.
fn push_quoted(out: &mut String, value: &str) -> Result<()> {
    let quotes = value.matches('\'').count();
    out.try_reserve(value.len() + quotes + 2)
        .map_err(|_| StatementVtabError::OutOfMemory)?;
    out.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            out.push('\'');
        }
        out.push(ch);
    }
    out.push('\'');
    Ok(())
}

fn push_str(out: &mut String, value: &str) -> Result<()> {
    out.try_reserve(value.len())
        .map_err(|_| StatementVtabError::OutOfMemory)?;
    out.push_str(value);
    Ok(())
}

/// Strip the leading sigil from a parameter name.
fn bare_parameter_name(name: &str) -> &str {
    name.strip_prefix(PARAM_SIGILS).unwrap_or(name)
}

/// Build the `CREATE TABLE` statement declaring `shape`.
///
/// ```text
/// CREATE TABLE x( 'year' ,'month' ,'day' ,'date' hidden)
/// ```
pub fn build_create_statement(shape: &StatementShape) -> Result<String> {
    let mut sql = String::new();
    push_str(&mut sql, "CREATE TABLE x( ")?;

    for (name, decltype) in &shape.columns {
        let name = name.as_deref().ok_or(StatementVtabError::OutOfMemory)?;
        push_quoted(&mut sql, name)?;
        push_str(&mut sql, " ")?;
        push_str(&mut sql, decltype.as_deref().unwrap_or(""))?;
        push_str(&mut sql, ",")?;
    }

    for (i, name) in shape.parameters.iter().enumerate() {
        match name {
            Some(name) => push_quoted(&mut sql, bare_parameter_name(name))?,
            None => push_quoted(&mut sql, &(i + 1).to_string())?,
        }
        push_str(&mut sql, " hidden,")?;
    }

    // The trailing separator becomes the closing parenthesis. With no
    // columns at all the separator is the space after `(`.
    sql.pop();
    sql.push(')');
    Ok(sql)
}
