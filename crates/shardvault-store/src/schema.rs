// crates/shardvault-store/src/schema.rs
// ============================================================================
// Module: ShardVault Table Schema
// Description: Typed table, column, and query definitions shared by backends.
// Purpose: Describe every per-shard read and write without query-text parsing.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Each shard hosts the same three tables. Callers describe reads and writes
//! with [`Select`] and [`Update`] values over a known [`Table`]; the Postgres
//! session renders them to parameterized SQL and the in-memory session
//! evaluates them directly. Every column reference is checked against the
//! table definition before it reaches a backend.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Serialize;

use crate::session::SessionError;

// ============================================================================
// SECTION: Columns
// ============================================================================

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// 64-bit signed integer (`BIGINT`).
    BigInt,
    /// UTF-8 text (`TEXT`).
    Text,
    /// Opaque bytes (`BYTEA`).
    Bytea,
}

impl ColumnType {
    /// Returns the Postgres type name.
    #[must_use]
    pub const fn sql_type(self) -> &'static str {
        match self {
            Self::BigInt => "BIGINT",
            Self::Text => "TEXT",
            Self::Bytea => "BYTEA",
        }
    }
}

/// Column definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name.
    pub name: &'static str,
    /// Storage type.
    pub kind: ColumnType,
    /// Whether the column accepts `NULL`.
    pub nullable: bool,
}

/// Shorthand for a non-nullable column.
const fn required(name: &'static str, kind: ColumnType) -> ColumnDef {
    ColumnDef {
        name,
        kind,
        nullable: false,
    }
}

/// Shorthand for a nullable column.
const fn optional(name: &'static str, kind: ColumnType) -> ColumnDef {
    ColumnDef {
        name,
        kind,
        nullable: true,
    }
}

/// Columns of `patient_records`.
const PATIENT_RECORD_COLUMNS: &[ColumnDef] = &[
    required("patient_id", ColumnType::Text),
    required("encrypted_name", ColumnType::Bytea),
    required("encrypted_history", ColumnType::Bytea),
    required("shard_id", ColumnType::BigInt),
    required("created_at", ColumnType::BigInt),
];

/// Columns of `medications`.
const MEDICATION_COLUMNS: &[ColumnDef] = &[
    required("medication_id", ColumnType::Text),
    required("patient_id", ColumnType::Text),
    required("drug_name", ColumnType::Text),
    required("strength", ColumnType::Text),
    required("frequency", ColumnType::Text),
    required("total_pills", ColumnType::BigInt),
    required("pills_remaining", ColumnType::BigInt),
    required("refill_threshold", ColumnType::BigInt),
    required("doses_per_day", ColumnType::BigInt),
    required("event_count", ColumnType::BigInt),
    optional("pharmacy_name", ColumnType::Text),
    optional("pharmacy_phone", ColumnType::Text),
    optional("last_taken_at", ColumnType::BigInt),
    required("shard_id", ColumnType::BigInt),
    required("created_at", ColumnType::BigInt),
];

/// Columns of `adherence_events`.
const ADHERENCE_EVENT_COLUMNS: &[ColumnDef] = &[
    required("event_id", ColumnType::Text),
    required("medication_id", ColumnType::Text),
    required("sequence", ColumnType::BigInt),
    required("event_type", ColumnType::Text),
    required("pills_count", ColumnType::BigInt),
    optional("scheduled_at", ColumnType::BigInt),
    required("recorded_at", ColumnType::BigInt),
];

// ============================================================================
// SECTION: Tables
// ============================================================================

/// Tables hosted on every shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Encrypted patient demographics.
    PatientRecords,
    /// Medication inventory per patient.
    Medications,
    /// Append-only adherence log per medication.
    AdherenceEvents,
}

impl Table {
    /// Every table, in creation order.
    pub const ALL: [Self; 3] = [Self::PatientRecords, Self::Medications, Self::AdherenceEvents];

    /// Returns the table name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PatientRecords => "patient_records",
            Self::Medications => "medications",
            Self::AdherenceEvents => "adherence_events",
        }
    }

    /// Returns the column definitions in declaration order.
    #[must_use]
    pub const fn columns(self) -> &'static [ColumnDef] {
        match self {
            Self::PatientRecords => PATIENT_RECORD_COLUMNS,
            Self::Medications => MEDICATION_COLUMNS,
            Self::AdherenceEvents => ADHERENCE_EVENT_COLUMNS,
        }
    }

    /// Returns the primary key column.
    #[must_use]
    pub const fn primary_key(self) -> &'static str {
        match self {
            Self::PatientRecords => "patient_id",
            Self::Medications => "medication_id",
            Self::AdherenceEvents => "event_id",
        }
    }

    /// Looks up a column definition by name.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Schema`] for unknown columns.
    pub fn column(self, name: &str) -> Result<&'static ColumnDef, SessionError> {
        self.columns().iter().find(|column| column.name == name).ok_or_else(|| {
            SessionError::Schema(format!("unknown column {name} on {}", self.name()))
        })
    }

    /// Returns the `CREATE TABLE IF NOT EXISTS` statement for this table.
    #[must_use]
    pub fn create_sql(self) -> String {
        let columns: Vec<String> = self
            .columns()
            .iter()
            .map(|column| {
                let null = if column.nullable { "" } else { " NOT NULL" };
                format!("{} {}{null}", column.name, column.kind.sql_type())
            })
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}));",
            self.name(),
            columns.join(", "),
            self.primary_key()
        )
    }

    /// Validates a row for insertion and fills absent nullable columns.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Schema`] for unknown columns, missing required
    /// columns, or type mismatches.
    pub fn normalize_row(self, mut row: Row) -> Result<Row, SessionError> {
        for name in row.keys() {
            self.column(name)?;
        }
        for column in self.columns() {
            let value = row.entry(column.name.to_string()).or_insert(Value::Null);
            check_value(self, column, value)?;
        }
        Ok(row)
    }
}

/// Checks that `value` fits `column`.
fn check_value(table: Table, column: &ColumnDef, value: &Value) -> Result<(), SessionError> {
    let fits = match value {
        Value::Null => column.nullable,
        Value::Integer(_) => column.kind == ColumnType::BigInt,
        Value::Text(_) => column.kind == ColumnType::Text,
        Value::Bytes(_) => column.kind == ColumnType::Bytea,
    };
    if fits {
        Ok(())
    } else {
        Err(SessionError::Schema(format!(
            "value of type {} does not fit {}.{} ({})",
            value.type_name(),
            table.name(),
            column.name,
            column.kind.sql_type()
        )))
    }
}

// ============================================================================
// SECTION: Values
// ============================================================================

/// Cell value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// Integer cell.
    Integer(i64),
    /// Text cell.
    Text(String),
    /// Byte cell.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns a label for error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Returns the integer payload, if any.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the text payload, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the byte payload, if any.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(value) => Some(value),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A row keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Builds a [`Row`] from column/value pairs.
#[must_use]
pub fn row<const N: usize>(cells: [(&str, Value); N]) -> Row {
    cells.into_iter().map(|(name, value)| (name.to_string(), value)).collect()
}

// ============================================================================
// SECTION: Queries
// ============================================================================

/// Equality predicate on one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// Column name.
    pub column: String,
    /// Value the column must equal.
    pub value: Value,
}

impl Filter {
    /// Returns whether `row` satisfies this predicate.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        row.get(&self.column) == Some(&self.value)
    }
}

/// Filtered read over one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    /// Table to read.
    pub table: Table,
    /// Conjunction of equality predicates.
    pub filters: Vec<Filter>,
    /// Projected columns; `None` selects every column.
    pub columns: Option<Vec<String>>,
    /// Ascending sort columns, most significant first.
    pub order_by: Vec<String>,
}

impl Select {
    /// Selects every row of `table`.
    #[must_use]
    pub const fn table(table: Table) -> Self {
        Self {
            table,
            filters: Vec::new(),
            columns: None,
            order_by: Vec::new(),
        }
    }

    /// Adds an equality predicate.
    #[must_use]
    pub fn filter(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    /// Restricts the returned columns.
    #[must_use]
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|column| (*column).to_string()).collect());
        self
    }

    /// Orders results ascending by `column`, after any earlier sort columns.
    #[must_use]
    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by.push(column.to_string());
        self
    }

    /// Returns the sort key of `row` under this query's ordering.
    #[must_use]
    pub fn sort_key<'a>(&self, row: &'a Row) -> Vec<Option<&'a Value>> {
        self.order_by.iter().map(|column| row.get(column)).collect()
    }

    /// Checks every column reference against the table definition.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Schema`] for unknown columns or `NULL` filters.
    pub fn validate(&self) -> Result<(), SessionError> {
        validate_filters(self.table, &self.filters)?;
        for column in self.columns.iter().flatten() {
            self.table.column(column)?;
        }
        for column in &self.order_by {
            self.table.column(column)?;
        }
        Ok(())
    }

    /// Applies the projection to a full row.
    #[must_use]
    pub fn project(&self, row: &Row) -> Row {
        match &self.columns {
            None => row.clone(),
            Some(columns) => columns
                .iter()
                .map(|column| (column.clone(), row.get(column).cloned().unwrap_or(Value::Null)))
                .collect(),
        }
    }
}

/// Column assignment in an [`Update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// `column = value`.
    Set(String, Value),
    /// `column = column + delta` on an integer column.
    Add(String, i64),
}

/// Filtered in-place update over one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    /// Table to update.
    pub table: Table,
    /// Assignments applied to each matching row.
    pub assignments: Vec<Assignment>,
    /// Conjunction of equality predicates.
    pub filters: Vec<Filter>,
}

impl Update {
    /// Starts an update with no assignments.
    #[must_use]
    pub const fn table(table: Table) -> Self {
        Self {
            table,
            assignments: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// Sets a column to a value.
    #[must_use]
    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.assignments.push(Assignment::Set(column.to_string(), value.into()));
        self
    }

    /// Adds `delta` to an integer column.
    #[must_use]
    pub fn add(mut self, column: &str, delta: i64) -> Self {
        self.assignments.push(Assignment::Add(column.to_string(), delta));
        self
    }

    /// Adds an equality predicate.
    #[must_use]
    pub fn filter(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    /// Checks assignments and predicates against the table definition.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Schema`] for unknown columns, type mismatches,
    /// primary key writes, or an empty assignment list.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.assignments.is_empty() {
            return Err(SessionError::Schema(format!(
                "update on {} has no assignments",
                self.table.name()
            )));
        }
        validate_filters(self.table, &self.filters)?;
        for assignment in &self.assignments {
            let (name, probe) = match assignment {
                Assignment::Set(name, value) => (name, value.clone()),
                Assignment::Add(name, delta) => (name, Value::Integer(*delta)),
            };
            if name == self.table.primary_key() {
                return Err(SessionError::Schema(format!(
                    "primary key {}.{name} is immutable",
                    self.table.name()
                )));
            }
            let column = self.table.column(name)?;
            check_value(self.table, column, &probe)?;
        }
        Ok(())
    }

    /// Applies the assignments to a row in place.
    pub fn apply(&self, row: &mut Row) {
        for assignment in &self.assignments {
            match assignment {
                Assignment::Set(name, value) => {
                    row.insert(name.clone(), value.clone());
                }
                Assignment::Add(name, delta) => {
                    let current = row.get(name).and_then(Value::as_i64).unwrap_or(0);
                    row.insert(name.clone(), Value::Integer(current.saturating_add(*delta)));
                }
            }
        }
    }

    /// Returns whether `row` satisfies every predicate.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        self.filters.iter().all(|filter| filter.matches(row))
    }
}

/// Checks filter columns and rejects `NULL` comparisons.
fn validate_filters(table: Table, filters: &[Filter]) -> Result<(), SessionError> {
    for filter in filters {
        let column = table.column(&filter.column)?;
        if filter.value == Value::Null {
            return Err(SessionError::Schema(format!(
                "filter on {}.{} compares against null",
                table.name(),
                column.name
            )));
        }
        check_value(table, column, &filter.value)?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::expect_used, reason = "Unit tests use expect for setup clarity.")]
mod tests {
    use super::Select;
    use super::Table;
    use super::Update;
    use super::Value;
    use super::row;

    #[test]
    fn create_sql_lists_columns_and_primary_key() {
        let sql = Table::AdherenceEvents.create_sql();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS adherence_events ("));
        assert!(sql.contains("scheduled_at BIGINT,"));
        assert!(sql.contains("recorded_at BIGINT NOT NULL"));
        assert!(sql.ends_with("PRIMARY KEY (event_id));"));
    }

    #[test]
    fn normalize_row_fills_nullable_and_rejects_unknown() {
        let event = row([
            ("event_id", Value::from("e1")),
            ("medication_id", Value::from("m1")),
            ("sequence", Value::from(1_i64)),
            ("event_type", Value::from("missed")),
            ("pills_count", Value::from(0_i64)),
            ("recorded_at", Value::from(10_i64)),
        ]);
        let normalized = Table::AdherenceEvents.normalize_row(event.clone()).expect("valid row");
        assert_eq!(normalized.get("scheduled_at"), Some(&Value::Null));

        let mut unknown = event;
        unknown.insert("patient_name".to_string(), Value::from("x"));
        assert!(Table::AdherenceEvents.normalize_row(unknown).is_err());
    }

    #[test]
    fn normalize_row_rejects_type_mismatch_and_missing_required() {
        let wrong_type = row([("patient_id", Value::from(7_i64))]);
        assert!(Table::PatientRecords.normalize_row(wrong_type).is_err());

        let missing = row([("patient_id", Value::from("p1"))]);
        assert!(Table::PatientRecords.normalize_row(missing).is_err());
    }

    #[test]
    fn select_validation_checks_columns_and_null_filters() {
        assert!(Select::table(Table::Medications).filter("patient_id", "p").validate().is_ok());
        assert!(Select::table(Table::Medications).filter("nope", "p").validate().is_err());
        assert!(Select::table(Table::Medications).filter("last_taken_at", Value::Null).validate().is_err());
        assert!(Select::table(Table::Medications).columns(&["ghost"]).validate().is_err());
    }

    #[test]
    fn sort_key_follows_order_by_columns() {
        let query = Select::table(Table::AdherenceEvents).order_by("recorded_at").order_by("sequence");
        assert!(query.validate().is_ok());
        let earlier = row([("recorded_at", Value::from(5_i64)), ("sequence", Value::from(2_i64))]);
        let later = row([("recorded_at", Value::from(5_i64)), ("sequence", Value::from(3_i64))]);
        assert!(query.sort_key(&earlier) < query.sort_key(&later));
        assert!(Select::table(Table::AdherenceEvents).order_by("ghost").validate().is_err());
    }

    #[test]
    fn update_rejects_primary_key_and_applies_deltas() {
        let bad = Update::table(Table::Medications).set("medication_id", "m2");
        assert!(bad.validate().is_err());
        assert!(Update::table(Table::Medications).validate().is_err());

        let update = Update::table(Table::Medications)
            .add("pills_remaining", -2)
            .set("last_taken_at", 42_i64)
            .filter("medication_id", "m1");
        update.validate().expect("valid update");
        let mut med = row([("medication_id", Value::from("m1")), ("pills_remaining", Value::from(10_i64))]);
        assert!(update.matches(&med));
        update.apply(&mut med);
        assert_eq!(med.get("pills_remaining"), Some(&Value::Integer(8)));
        assert_eq!(med.get("last_taken_at"), Some(&Value::Integer(42)));
    }
}
