use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, ToSql};
use tracing::debug;

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};

/// Tables the core contracts on. Missing any of these at open is a
/// deployment defect, not a runtime condition.
const REQUIRED_TABLES: [&str; 5] = [
    "players",
    "teams",
    "leagues",
    "seasons",
    "player_season_stats",
];

/// Keywords that disqualify a statement outright. Matched on word
/// boundaries so column names like `created_at` pass.
const FORBIDDEN_KEYWORDS: [&str; 17] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "REPLACE", "MERGE",
    "GRANT", "REVOKE", "ATTACH", "DETACH", "VACUUM", "REINDEX", "PRAGMA", "COPY",
];

const PROJECTION_STARTERS: [&str; 3] = ["SELECT", "WITH", "EXPLAIN"];

/// The only component that speaks SQL. Connections are opened read-only
/// and additionally pinned with `PRAGMA query_only`; statement text is
/// inspected before preparation. Database-level privileges are assumed as
/// the outermost layer.
#[derive(Debug)]
pub struct StoreGateway {
    pool: Arc<Pool>,
    schema: SchemaDescriptor,
}

impl StoreGateway {
    pub fn open(path: &Path, config: &CoreConfig) -> Result<Self> {
        let mut conns = Vec::with_capacity(config.store_pool_size);
        for _ in 0..config.store_pool_size.max(1) {
            conns.push(open_readonly(path)?);
        }

        let schema = snapshot_schema(&conns[0])?;
        for table in REQUIRED_TABLES {
            if !schema.has_table(table) {
                return Err(CoreError::SchemaMismatch(format!(
                    "required table '{table}' not found in store"
                )));
            }
        }

        debug!(
            tables = schema.tables.len(),
            pool = conns.len(),
            "store gateway open"
        );

        Ok(Self {
            pool: Arc::new(Pool::new(conns, config.store_timeout())),
            schema,
        })
    }

    /// Execute a parameterised projection. The template must begin with a
    /// projection keyword and is rejected wholesale if it mentions any
    /// mutation keyword. Parameters are bound by name only.
    pub fn fetch(&self, sql: &str, params: &[(&str, &dyn ToSql)]) -> Result<Table> {
        guard_statement(sql)?;

        let lease = self.pool.acquire()?;
        let conn = lease.conn();

        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = stmt.query(params)?;
        let mut out: Vec<Vec<Cell>> = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                cells.push(Cell::from_value_ref(row.get_ref(idx)?));
            }
            out.push(cells);
        }

        debug!(rows = out.len(), head = %sql_head(sql), "fetch");
        Ok(Table {
            columns,
            rows: out,
        })
    }

    /// Table and column names known to the gateway, captured at open.
    /// The catalogue self-check runs against this.
    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }
}

fn open_readonly(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|err| CoreError::StoreUnavailable(format!("open {}: {err}", path.display())))?;
    // Second defensive layer on top of the read-only open flag.
    conn.pragma_update(None, "query_only", "ON")
        .map_err(|err| CoreError::StoreUnavailable(format!("set query_only: {err}")))?;
    Ok(conn)
}

fn snapshot_schema(conn: &Connection) -> Result<SchemaDescriptor> {
    let mut tables = BTreeMap::new();

    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for name in names {
        let mut cols_stmt =
            conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
        let cols = cols_stmt
            .query_map([&name], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        tables.insert(name, cols);
    }

    Ok(SchemaDescriptor { tables })
}

/// Statement-level mutation check: the third defensive layer.
pub fn guard_statement(sql: &str) -> Result<()> {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    if trimmed.is_empty() {
        return Err(CoreError::ForbiddenStatement("empty statement".into()));
    }
    if trimmed.contains(';') {
        return Err(CoreError::ForbiddenStatement(
            "multiple statements are not allowed".into(),
        ));
    }

    let mut words = sql_words(trimmed);
    let first = words.next().unwrap_or_default();
    if !PROJECTION_STARTERS.contains(&first.as_str()) {
        return Err(CoreError::ForbiddenStatement(format!(
            "statement must start with SELECT, WITH or EXPLAIN, got '{first}'"
        )));
    }

    for word in words {
        if FORBIDDEN_KEYWORDS.contains(&word.as_str()) {
            return Err(CoreError::ForbiddenStatement(format!(
                "statement contains mutation keyword '{word}'"
            )));
        }
    }
    Ok(())
}

fn sql_words(sql: &str) -> impl Iterator<Item = String> + '_ {
    sql.split(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_uppercase())
}

fn sql_head(sql: &str) -> String {
    let flat: String = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    flat.chars().take(80).collect()
}

// ---------------------------------------------------------------------------
// Connection pool
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Pool {
    conns: Mutex<Vec<Connection>>,
    ready: Condvar,
    timeout: Duration,
}

impl Pool {
    fn new(conns: Vec<Connection>, timeout: Duration) -> Self {
        Self {
            conns: Mutex::new(conns),
            ready: Condvar::new(),
            timeout,
        }
    }

    fn acquire(self: &Arc<Self>) -> Result<Lease> {
        let deadline = Instant::now() + self.timeout;
        let mut guard = self
            .conns
            .lock()
            .map_err(|_| CoreError::StoreUnavailable("connection pool poisoned".into()))?;
        loop {
            if let Some(conn) = guard.pop() {
                return Ok(Lease {
                    conn: Some(conn),
                    pool: Arc::clone(self),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CoreError::StoreUnavailable(format!(
                    "no store connection available within {} ms",
                    self.timeout.as_millis()
                )));
            }
            let (next, wait) = self
                .ready
                .wait_timeout(guard, deadline - now)
                .map_err(|_| CoreError::StoreUnavailable("connection pool poisoned".into()))?;
            guard = next;
            if wait.timed_out() && guard.is_empty() {
                return Err(CoreError::StoreUnavailable(format!(
                    "no store connection available within {} ms",
                    self.timeout.as_millis()
                )));
            }
        }
    }

    fn release(&self, conn: Connection) {
        if let Ok(mut guard) = self.conns.lock() {
            guard.push(conn);
        }
        self.ready.notify_one();
    }
}

/// Scoped connection lease; returned to the pool on drop, so every exit
/// path of a fetch releases promptly.
struct Lease {
    conn: Option<Connection>,
    pool: Arc<Pool>,
}

impl Lease {
    fn conn(&self) -> &Connection {
        self.conn.as_ref().expect("lease holds a connection")
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

// ---------------------------------------------------------------------------
// Tabular results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl Cell {
    fn from_value_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Cell::Null,
            ValueRef::Integer(v) => Cell::Int(v),
            ValueRef::Real(v) => Cell::Real(v),
            ValueRef::Text(v) => Cell::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(_) => Cell::Null,
        }
    }
}

/// Fully materialised result set. Result sets in this store are per-player
/// season aggregates, small enough that callers may rely on full
/// materialisation.
#[derive(Debug, Clone)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, idx: usize) -> RowView<'_> {
        RowView {
            columns: &self.columns,
            cells: &self.rows[idx],
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = RowView<'_>> {
        self.rows.iter().map(move |cells| RowView {
            columns: &self.columns,
            cells,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    columns: &'a [String],
    cells: &'a [Cell],
}

impl<'a> RowView<'a> {
    fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Numeric accessor; integer cells widen to f64, null is None.
    pub fn f64(&self, name: &str) -> Option<f64> {
        match self.cells.get(self.index_of(name)?)? {
            Cell::Int(v) => Some(*v as f64),
            Cell::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        match self.cells.get(self.index_of(name)?)? {
            Cell::Int(v) => Some(*v),
            Cell::Real(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn str(&self, name: &str) -> Option<&'a str> {
        match self.cells.get(self.index_of(name)?)? {
            Cell::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    tables: BTreeMap<String, Vec<String>>,
}

impl SchemaDescriptor {
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(table)
            .is_some_and(|cols| cols.iter().any(|c| c == column))
    }

    pub fn columns(&self, table: &str) -> Option<&[String]> {
        self.tables.get(table).map(|c| c.as_slice())
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|k| k.as_str())
    }
}
