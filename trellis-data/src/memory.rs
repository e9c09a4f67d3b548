//! In-process connection source.
//!
//! Understands the statement shapes the data layer builds (`CREATE TABLE`,
//! `INSERT`, `UPDATE … WHERE col = ?`, `DELETE … WHERE col = ?`,
//! `SELECT * FROM t [WHERE col = ?]`) with `?` placeholders only. A
//! transaction works on a private copy of the tables that replaces the shared
//! state on commit, so concurrent writers follow last-commit-wins.
//!
//! Every connection event is appended to a journal, and statements can be
//! made to fail on demand, which makes the driver the test double for the
//! transaction machinery.

use crate::{BoxError, Connection, ConnectionSource, Row};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

type Tables = BTreeMap<String, Table>;

#[derive(Debug, Clone, Default)]
struct Table {
    rows: Vec<Row>,
    next_id: i64,
}

/// Failures raised by the in-memory driver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MemoryError {
    /// Statement shape the driver does not understand.
    #[error("unsupported statement: {0}")]
    Unsupported(String),

    /// Statement names a table that was never created.
    #[error("no such table: {0}")]
    UnknownTable(String),

    /// Placeholder and parameter counts differ.
    #[error("expected {expected} parameters, got {found}")]
    ParamCount {
        /// Placeholders in the statement.
        expected: usize,
        /// Parameters supplied.
        found: usize,
    },

    /// Explicit `id` column that is not an integer.
    #[error("invalid row id: {0}")]
    InvalidId(String),

    /// Failure requested through [`MemoryDatabase::fail_when`].
    #[error("injected failure for: {0}")]
    Injected(String),

    /// Transaction control used out of order.
    #[error("transaction state: {0}")]
    TransactionState(&'static str),
}

/// One recorded connection event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    /// Connection handed out.
    Acquire {
        /// Connection number.
        connection: usize,
    },
    /// Auto-commit disabled.
    Begin {
        /// Connection number.
        connection: usize,
    },
    /// Read issued.
    Query {
        /// Connection number.
        connection: usize,
        /// Statement text.
        sql: String,
    },
    /// Write issued.
    Execute {
        /// Connection number.
        connection: usize,
        /// Statement text.
        sql: String,
    },
    /// Transaction committed.
    Commit {
        /// Connection number.
        connection: usize,
    },
    /// Transaction rolled back.
    Rollback {
        /// Connection number.
        connection: usize,
    },
    /// Connection dropped and returned.
    Release {
        /// Connection number.
        connection: usize,
    },
}

impl JournalEntry {
    /// Connection the event happened on.
    pub fn connection(&self) -> usize {
        match self {
            JournalEntry::Acquire { connection }
            | JournalEntry::Begin { connection }
            | JournalEntry::Query { connection, .. }
            | JournalEntry::Execute { connection, .. }
            | JournalEntry::Commit { connection }
            | JournalEntry::Rollback { connection }
            | JournalEntry::Release { connection } => *connection,
        }
    }
}

#[derive(Default)]
struct Shared {
    tables: Mutex<Tables>,
    journal: Mutex<Vec<JournalEntry>>,
    failures: Mutex<Vec<String>>,
    next_connection: AtomicUsize,
}

impl Shared {
    fn record(&self, entry: JournalEntry) {
        self.journal.lock().push(entry);
    }

    fn check_failure(&self, sql: &str) -> Result<(), MemoryError> {
        let upper = sql.to_ascii_uppercase();
        let failures = self.failures.lock();
        if failures.iter().any(|fragment| upper.contains(fragment.as_str())) {
            return Err(MemoryError::Injected(sql.to_string()));
        }
        Ok(())
    }
}

/// Shared in-memory database; clones observe the same state.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
}

impl MemoryDatabase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `table` up front.
    pub fn with_table(self, table: &str) -> Self {
        self.shared
            .tables
            .lock()
            .entry(table.to_string())
            .or_default();
        self
    }

    /// Make every statement containing `fragment` (case-insensitive) fail.
    pub fn fail_when(&self, fragment: &str) {
        self.shared.failures.lock().push(fragment.to_ascii_uppercase());
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.shared.failures.lock().clear();
    }

    /// Committed rows of `table`.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.shared
            .tables
            .lock()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the event journal.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.shared.journal.lock().clone()
    }

    /// Forget recorded events.
    pub fn clear_journal(&self) {
        self.shared.journal.lock().clear();
    }

    /// Statement texts of every write issued, in order.
    pub fn executed(&self) -> Vec<String> {
        self.shared
            .journal
            .lock()
            .iter()
            .filter_map(|entry| match entry {
                JournalEntry::Execute { sql, .. } => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of begin events.
    pub fn begins(&self) -> usize {
        self.count(|e| matches!(e, JournalEntry::Begin { .. }))
    }

    /// Number of commit events.
    pub fn commits(&self) -> usize {
        self.count(|e| matches!(e, JournalEntry::Commit { .. }))
    }

    /// Number of rollback events.
    pub fn rollbacks(&self) -> usize {
        self.count(|e| matches!(e, JournalEntry::Rollback { .. }))
    }

    /// Number of connections handed out.
    pub fn acquired(&self) -> usize {
        self.count(|e| matches!(e, JournalEntry::Acquire { .. }))
    }

    /// Number of connections returned.
    pub fn released(&self) -> usize {
        self.count(|e| matches!(e, JournalEntry::Release { .. }))
    }

    fn count(&self, predicate: impl Fn(&JournalEntry) -> bool) -> usize {
        self.shared.journal.lock().iter().filter(|e| predicate(e)).count()
    }
}

#[async_trait]
impl ConnectionSource for MemoryDatabase {
    async fn acquire(&self) -> Result<Box<dyn Connection>, BoxError> {
        let id = self.shared.next_connection.fetch_add(1, Ordering::Relaxed) + 1;
        self.shared.record(JournalEntry::Acquire { connection: id });
        Ok(Box::new(MemoryConnection {
            id,
            shared: Arc::clone(&self.shared),
            staged: None,
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Connection handed out by [`MemoryDatabase`].
pub struct MemoryConnection {
    id: usize,
    shared: Arc<Shared>,
    staged: Option<Tables>,
}

impl MemoryConnection {
    fn run(&mut self, sql: &str, params: &[Value]) -> Result<Outcome, MemoryError> {
        self.shared.check_failure(sql)?;
        let parsed = parse(sql)?;
        match &mut self.staged {
            Some(staged) => apply(staged, &parsed, params),
            None => apply(&mut self.shared.tables.lock(), &parsed, params),
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, BoxError> {
        self.shared.record(JournalEntry::Query {
            connection: self.id,
            sql: sql.to_string(),
        });
        match self.run(sql, params)? {
            Outcome::Rows(rows) => Ok(rows),
            Outcome::Affected(_) => Err(MemoryError::Unsupported(format!("not a query: {}", sql)).into()),
        }
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, BoxError> {
        self.shared.record(JournalEntry::Execute {
            connection: self.id,
            sql: sql.to_string(),
        });
        match self.run(sql, params)? {
            Outcome::Affected(count) => Ok(count),
            Outcome::Rows(_) => Err(MemoryError::Unsupported(format!("not an update: {}", sql)).into()),
        }
    }

    async fn begin(&mut self) -> Result<(), BoxError> {
        if self.staged.is_some() {
            return Err(MemoryError::TransactionState("transaction already open").into());
        }
        self.staged = Some(self.shared.tables.lock().clone());
        self.shared.record(JournalEntry::Begin { connection: self.id });
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), BoxError> {
        if let Some(staged) = self.staged.take() {
            *self.shared.tables.lock() = staged;
        }
        self.shared.record(JournalEntry::Commit { connection: self.id });
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), BoxError> {
        self.staged = None;
        self.shared.record(JournalEntry::Rollback { connection: self.id });
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.shared.record(JournalEntry::Release { connection: self.id });
    }
}

enum Outcome {
    Rows(Vec<Row>),
    Affected(u64),
}

#[derive(Debug, PartialEq)]
enum Parsed<'s> {
    Create { table: &'s str },
    Insert { table: &'s str, columns: Vec<&'s str> },
    Update { table: &'s str, columns: Vec<&'s str>, key: &'s str },
    Delete { table: &'s str, key: &'s str },
    Select { table: &'s str, key: Option<&'s str> },
}

fn apply(tables: &mut Tables, parsed: &Parsed<'_>, params: &[Value]) -> Result<Outcome, MemoryError> {
    match parsed {
        Parsed::Create { table } => {
            tables.entry(table.to_string()).or_default();
            Ok(Outcome::Affected(0))
        }
        Parsed::Insert { table, columns } => {
            expect_params(columns.len(), params)?;
            let table = lookup(tables, table)?;
            let mut row = Row::new();
            for (column, value) in columns.iter().zip(params) {
                row.insert(column.to_string(), value.clone());
            }
            let id = match row.get("id") {
                None | Some(Value::Null) => {
                    table.next_id += 1;
                    table.next_id
                }
                Some(value) => {
                    let id = row_id(value)?;
                    table.next_id = table.next_id.max(id);
                    id
                }
            };
            row.insert("id".to_string(), Value::from(id));
            table.rows.push(row);
            Ok(Outcome::Affected(1))
        }
        Parsed::Update { table, columns, key } => {
            expect_params(columns.len() + 1, params)?;
            let table = lookup(tables, table)?;
            let (values, key_value) = params.split_at(columns.len());
            let mut affected = 0;
            for row in table.rows.iter_mut().filter(|row| matches_key(row, key, &key_value[0])) {
                for (column, value) in columns.iter().zip(values) {
                    row.insert(column.to_string(), value.clone());
                }
                affected += 1;
            }
            Ok(Outcome::Affected(affected))
        }
        Parsed::Delete { table, key } => {
            expect_params(1, params)?;
            let table = lookup(tables, table)?;
            let before = table.rows.len();
            table.rows.retain(|row| !matches_key(row, key, &params[0]));
            Ok(Outcome::Affected((before - table.rows.len()) as u64))
        }
        Parsed::Select { table, key } => {
            expect_params(usize::from(key.is_some()), params)?;
            let table = lookup(tables, table)?;
            let rows = table
                .rows
                .iter()
                .filter(|row| key.is_none_or(|key| matches_key(row, key, &params[0])))
                .cloned()
                .collect();
            Ok(Outcome::Rows(rows))
        }
    }
}

/// Explicit ids may arrive as numbers or as numeric text from form fields.
fn row_id(value: &Value) -> Result<i64, MemoryError> {
    let id = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    id.ok_or_else(|| MemoryError::InvalidId(value.to_string()))
}

fn lookup<'t>(tables: &'t mut Tables, name: &str) -> Result<&'t mut Table, MemoryError> {
    tables
        .get_mut(name)
        .ok_or_else(|| MemoryError::UnknownTable(name.to_string()))
}

fn expect_params(expected: usize, params: &[Value]) -> Result<(), MemoryError> {
    if expected != params.len() {
        return Err(MemoryError::ParamCount {
            expected,
            found: params.len(),
        });
    }
    Ok(())
}

fn matches_key(row: &Row, column: &str, expected: &Value) -> bool {
    row.get(column).is_some_and(|actual| {
        actual == expected || scalar_text(actual).is_some_and(|a| Some(a) == scalar_text(expected))
    })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse(sql: &str) -> Result<Parsed<'_>, MemoryError> {
    let unsupported = || MemoryError::Unsupported(sql.to_string());
    let text = sql.trim().trim_end_matches(';');

    if let Some(rest) = keyword(text, "CREATE") {
        let rest = keyword(rest, "TABLE").ok_or_else(unsupported)?;
        let rest = match keyword(rest, "IF") {
            Some(r) => keyword(r, "NOT")
                .and_then(|r| keyword(r, "EXISTS"))
                .ok_or_else(unsupported)?,
            None => rest,
        };
        let (table, _) = ident(rest).ok_or_else(unsupported)?;
        return Ok(Parsed::Create { table });
    }

    if let Some(rest) = keyword(text, "INSERT") {
        let rest = keyword(rest, "INTO").ok_or_else(unsupported)?;
        let (table, rest) = ident(rest).ok_or_else(unsupported)?;
        let rest = rest.trim_start().strip_prefix('(').ok_or_else(unsupported)?;
        let (columns, rest) = rest.split_once(')').ok_or_else(unsupported)?;
        let columns: Vec<&str> = columns.split(',').map(str::trim).collect();
        let values = keyword(rest, "VALUES")
            .and_then(|r| r.trim().strip_prefix('('))
            .and_then(|r| r.strip_suffix(')'))
            .ok_or_else(unsupported)?;
        let placeholders: Vec<&str> = values.split(',').map(str::trim).collect();
        if placeholders.len() != columns.len()
            || placeholders.iter().any(|p| *p != "?")
            || columns.iter().any(|c| ident(c).is_none_or(|(_, rest)| !rest.is_empty()))
        {
            return Err(unsupported());
        }
        return Ok(Parsed::Insert { table, columns });
    }

    if let Some(rest) = keyword(text, "UPDATE") {
        let (table, rest) = ident(rest).ok_or_else(unsupported)?;
        let rest = keyword(rest, "SET").ok_or_else(unsupported)?;
        let (assignments, condition) = split_keyword(rest, "WHERE").ok_or_else(unsupported)?;
        let columns = assignments
            .split(',')
            .map(|a| column_equals_placeholder(a).ok_or_else(unsupported))
            .collect::<Result<Vec<_>, _>>()?;
        let key = column_equals_placeholder(condition).ok_or_else(unsupported)?;
        return Ok(Parsed::Update { table, columns, key });
    }

    if let Some(rest) = keyword(text, "DELETE") {
        let rest = keyword(rest, "FROM").ok_or_else(unsupported)?;
        let (table, rest) = ident(rest).ok_or_else(unsupported)?;
        let rest = keyword(rest, "WHERE").ok_or_else(unsupported)?;
        let key = column_equals_placeholder(rest).ok_or_else(unsupported)?;
        return Ok(Parsed::Delete { table, key });
    }

    if let Some(rest) = keyword(text, "SELECT") {
        let rest = rest.strip_prefix('*').ok_or_else(unsupported)?;
        let rest = keyword(rest, "FROM").ok_or_else(unsupported)?;
        let (table, rest) = ident(rest).ok_or_else(unsupported)?;
        let key = match keyword(rest, "WHERE") {
            Some(condition) => Some(column_equals_placeholder(condition).ok_or_else(unsupported)?),
            None if rest.trim().is_empty() => None,
            None => return Err(unsupported()),
        };
        return Ok(Parsed::Select { table, key });
    }

    Err(unsupported())
}

/// Strip a case-insensitive leading keyword followed by a word boundary.
fn keyword<'s>(input: &'s str, kw: &str) -> Option<&'s str> {
    let input = input.trim_start();
    let head = input.get(..kw.len())?;
    if !head.eq_ignore_ascii_case(kw) {
        return None;
    }
    let rest = &input[kw.len()..];
    if rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace() || c == '(') {
        Some(rest.trim_start())
    } else {
        None
    }
}

/// Split at the first ` KEYWORD ` (case-insensitive).
fn split_keyword<'s>(input: &'s str, kw: &str) -> Option<(&'s str, &'s str)> {
    let needle = format!(" {} ", kw.to_ascii_uppercase());
    let index = input.to_ascii_uppercase().find(&needle)?;
    Some((&input[..index], &input[index + needle.len()..]))
}

/// Leading identifier and the remaining input.
fn ident(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    let end = input
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(input.len());
    (end > 0).then(|| (&input[..end], &input[end..]))
}

/// `column = ?` with nothing trailing.
fn column_equals_placeholder(input: &str) -> Option<&str> {
    let (column, rest) = ident(input)?;
    let rest = rest.trim_start().strip_prefix('=')?.trim_start();
    let rest = rest.strip_prefix('?')?;
    rest.trim().is_empty().then_some(column)
}
