// crates/shardvault-store/src/postgres.rs
// ============================================================================
// Module: ShardVault Postgres Sessions
// Description: r2d2-pooled Postgres connections and transactional sessions.
// Purpose: Serve LIVE shards with bounded pools and one transaction per scope.
// Dependencies: postgres, r2d2, r2d2_postgres, shardvault-core
// ============================================================================

//! ## Overview
//! [`connect_pool`] builds a bounded pool for one shard and provisions the
//! shard tables. [`PostgresSession`] wraps one checked-out connection inside
//! an explicit `BEGIN`; it renders typed [`Select`]/[`Update`] statements to
//! parameterized SQL. Column names always come from the static table
//! definitions, never from caller text.
//!
//! A session that is dropped without [`PostgresSession::commit`] issues
//! `ROLLBACK` before its connection returns to the pool and records a
//! `transaction_rolled_back` audit event, including the failure when the
//! rollback itself does not succeed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use postgres::Client;
use postgres::NoTls;
use postgres::error::SqlState;
use postgres::types::ToSql;
use r2d2::Pool;
use r2d2::PooledConnection;
use r2d2_postgres::PostgresConnectionManager;
use shardvault_core::AuditKind;
use shardvault_core::AuditSink;
use shardvault_core::DatabaseCredentials;
use shardvault_core::ShardId;
use shardvault_core::StorageAuditEvent;

use crate::schema::Assignment;
use crate::schema::ColumnDef;
use crate::schema::ColumnType;
use crate::schema::Filter;
use crate::schema::Row;
use crate::schema::Select;
use crate::schema::Table;
use crate::schema::Update;
use crate::schema::Value;
use crate::session::SessionError;
use crate::session::ShardSession;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Pool of Postgres connections for one shard.
pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;
/// Connection checked out of a [`PgPool`].
type PgConnection = PooledConnection<PostgresConnectionManager<NoTls>>;
/// Boxed statement parameter.
type SqlParam = Box<dyn ToSql + Sync>;

/// Connection parameters for one shard.
#[derive(Clone)]
pub struct ConnectionParams {
    /// Shard credentials from the secret provider.
    pub credentials: DatabaseCredentials,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Maximum wait for a pooled connection in milliseconds.
    pub acquire_timeout_ms: u64,
    /// Server-side statement timeout in milliseconds.
    pub statement_timeout_ms: u64,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("endpoint", &self.credentials.endpoint_label())
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("acquire_timeout_ms", &self.acquire_timeout_ms)
            .field("statement_timeout_ms", &self.statement_timeout_ms)
            .finish()
    }
}

impl ConnectionParams {
    /// Creates parameters with default timeouts.
    #[must_use]
    pub const fn new(credentials: DatabaseCredentials) -> Self {
        Self {
            credentials,
            connect_timeout_ms: 5_000,
            acquire_timeout_ms: 5_000,
            statement_timeout_ms: 30_000,
        }
    }

    /// Builds the driver configuration.
    fn pg_config(&self) -> postgres::Config {
        let creds = &self.credentials;
        let mut pg_config = postgres::Config::new();
        pg_config
            .host(&creds.host)
            .port(creds.port)
            .dbname(&creds.database)
            .user(&creds.username)
            .password(&creds.password)
            .connect_timeout(Duration::from_millis(self.connect_timeout_ms));
        let options = format!("-c statement_timeout={}", self.statement_timeout_ms);
        pg_config.options(&options);
        pg_config
    }
}

// ============================================================================
// SECTION: Pool Construction
// ============================================================================

/// Builds a pool holding between `min` and `max` connections and provisions
/// the shard tables.
///
/// Bounds must already be validated: `max > 0`, `min <= max`, and a non-zero
/// acquire timeout.
///
/// # Errors
///
/// Returns a description of the failure when the shard cannot be reached or
/// provisioned.
pub fn connect_pool(params: &ConnectionParams, min: u32, max: u32) -> Result<PgPool, String> {
    let manager = PostgresConnectionManager::new(params.pg_config(), NoTls);
    let pool = Pool::builder()
        .max_size(max)
        .min_idle(Some(min))
        .connection_timeout(Duration::from_millis(params.acquire_timeout_ms))
        .build(manager)
        .map_err(|err| err.to_string())?;
    let mut conn = pool.get().map_err(|err| err.to_string())?;
    ensure_schema(&mut conn).map_err(|err| err.to_string())?;
    Ok(pool)
}

/// Ensures every shard table exists.
fn ensure_schema(client: &mut Client) -> Result<(), postgres::Error> {
    let ddl: String = Table::ALL.iter().map(|table| table.create_sql()).collect();
    client.batch_execute(&ddl)
}

// ============================================================================
// SECTION: Session
// ============================================================================

/// Transactional session over one pooled connection.
///
/// # Invariants
/// - A transaction is open from construction until commit or rollback.
pub struct PostgresSession {
    /// Shard the session is bound to.
    shard_id: ShardId,
    /// Checked-out connection.
    conn: PgConnection,
    /// Whether the transaction has been closed.
    finished: bool,
    /// Sink for rollbacks issued on drop.
    audit: Arc<dyn AuditSink>,
}

impl PostgresSession {
    /// Opens a transaction on a checked-out connection.
    pub(crate) fn begin(
        shard_id: ShardId,
        mut conn: PgConnection,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, SessionError> {
        conn.batch_execute("BEGIN").map_err(map_pg_error)?;
        Ok(Self {
            shard_id,
            conn,
            finished: false,
            audit,
        })
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the commit fails.
    pub fn commit(mut self) -> Result<(), SessionError> {
        self.finished = true;
        self.conn.batch_execute("COMMIT").map_err(map_pg_error)
    }

    /// Rolls the transaction back.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the rollback fails.
    pub fn rollback(mut self) -> Result<(), SessionError> {
        self.finished = true;
        self.conn.batch_execute("ROLLBACK").map_err(map_pg_error)
    }

    /// Runs a statement that returns no rows.
    fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64, SessionError> {
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|param| &**param).collect();
        self.conn.execute(sql, &refs).map_err(map_pg_error)
    }
}

impl Drop for PostgresSession {
    fn drop(&mut self) {
        if !self.finished {
            let outcome = self.conn.batch_execute("ROLLBACK").map_err(map_pg_error);
            record_abandoned(self.audit.as_ref(), self.shard_id, outcome.err().as_ref());
        }
    }
}

impl ShardSession for PostgresSession {
    fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    fn insert(&mut self, table: Table, row: Row) -> Result<(), SessionError> {
        let row = table.normalize_row(row)?;
        let mut names = Vec::with_capacity(row.len());
        let mut placeholders = Vec::with_capacity(row.len());
        let mut params = Vec::with_capacity(row.len());
        for (name, value) in &row {
            let column = table.column(name)?;
            names.push(column.name);
            params.push(to_param(value, column.kind));
            placeholders.push(format!("${}", params.len()));
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.name(),
            names.join(", "),
            placeholders.join(", ")
        );
        self.execute(&sql, &params)?;
        Ok(())
    }

    fn select(&mut self, query: &Select) -> Result<Vec<Row>, SessionError> {
        query.validate()?;
        let table = query.table;
        let projected: Vec<&'static ColumnDef> = match &query.columns {
            Some(columns) => {
                columns.iter().map(|name| table.column(name)).collect::<Result<_, _>>()?
            }
            None => table.columns().iter().collect(),
        };
        let names: Vec<&str> = projected.iter().map(|column| column.name).collect();
        let mut params = Vec::new();
        let mut sql = format!("SELECT {} FROM {}", names.join(", "), table.name());
        sql.push_str(&where_clause(table, &query.filters, &mut params)?);
        if !query.order_by.is_empty() {
            let order: Vec<&str> = query
                .order_by
                .iter()
                .map(|name| table.column(name).map(|column| column.name))
                .collect::<Result<_, _>>()?;
            sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|param| &**param).collect();
        let pg_rows = self.conn.query(sql.as_str(), &refs).map_err(map_pg_error)?;
        pg_rows
            .iter()
            .map(|pg_row| {
                let mut row = Row::new();
                for (idx, column) in projected.iter().enumerate() {
                    row.insert(column.name.to_string(), read_cell(pg_row, idx, column.kind)?);
                }
                Ok(row)
            })
            .collect()
    }

    fn update(&mut self, update: &Update) -> Result<u64, SessionError> {
        update.validate()?;
        let table = update.table;
        let mut params = Vec::new();
        let mut assignments = Vec::with_capacity(update.assignments.len());
        for assignment in &update.assignments {
            match assignment {
                Assignment::Set(name, value) => {
                    let column = table.column(name)?;
                    params.push(to_param(value, column.kind));
                    assignments.push(format!("{} = ${}", column.name, params.len()));
                }
                Assignment::Add(name, delta) => {
                    let column = table.column(name)?;
                    params.push(Box::new(*delta) as SqlParam);
                    assignments.push(format!(
                        "{name} = {name} + ${}",
                        params.len(),
                        name = column.name
                    ));
                }
            }
        }
        let mut sql = format!("UPDATE {} SET {}", table.name(), assignments.join(", "));
        sql.push_str(&where_clause(table, &update.filters, &mut params)?);
        self.execute(&sql, &params)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Records the rollback of a session dropped before commit.
fn record_abandoned(audit: &dyn AuditSink, shard_id: ShardId, failure: Option<&SessionError>) {
    let message = match failure {
        None => "session dropped without commit".to_string(),
        Some(err) => format!("session dropped without commit; rollback failed: {err}"),
    };
    audit.record(
        &StorageAuditEvent::new(AuditKind::TransactionRolledBack).shard(shard_id).message(message),
    );
}

/// Renders a `WHERE` clause and appends its parameters.
fn where_clause(
    table: Table,
    filters: &[Filter],
    params: &mut Vec<SqlParam>,
) -> Result<String, SessionError> {
    if filters.is_empty() {
        return Ok(String::new());
    }
    let mut predicates = Vec::with_capacity(filters.len());
    for filter in filters {
        let column = table.column(&filter.column)?;
        params.push(to_param(&filter.value, column.kind));
        predicates.push(format!("{} = ${}", column.name, params.len()));
    }
    Ok(format!(" WHERE {}", predicates.join(" AND ")))
}

/// Converts a cell value into a typed statement parameter.
fn to_param(value: &Value, kind: ColumnType) -> SqlParam {
    match value {
        Value::Null => match kind {
            ColumnType::BigInt => Box::new(None::<i64>),
            ColumnType::Text => Box::new(None::<String>),
            ColumnType::Bytea => Box::new(None::<Vec<u8>>),
        },
        Value::Integer(value) => Box::new(*value),
        Value::Text(value) => Box::new(value.clone()),
        Value::Bytes(value) => Box::new(value.clone()),
    }
}

/// Reads one result cell as a [`Value`].
fn read_cell(row: &postgres::Row, idx: usize, kind: ColumnType) -> Result<Value, SessionError> {
    let value = match kind {
        ColumnType::BigInt => row.try_get::<_, Option<i64>>(idx).map(Value::from),
        ColumnType::Text => row.try_get::<_, Option<String>>(idx).map(Value::from),
        ColumnType::Bytea => row.try_get::<_, Option<Vec<u8>>>(idx).map(Value::from),
    };
    value.map_err(|err| SessionError::Backend(err.to_string()))
}

/// Maps a driver error onto the session taxonomy.
fn map_pg_error(err: postgres::Error) -> SessionError {
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        SessionError::Constraint(err.to_string())
    } else {
        SessionError::Backend(err.to_string())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
