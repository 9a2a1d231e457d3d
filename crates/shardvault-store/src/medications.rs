// crates/shardvault-store/src/medications.rs
// ============================================================================
// Module: ShardVault Medication Ledger
// Description: Medication inventory and adherence log on the patient's shard.
// Purpose: Keep pill counts and the adherence events that changed them in step.
// Dependencies: serde, shardvault-core, uuid
// ============================================================================

//! ## Overview
//! Medications and their adherence events live on the shard that owns the
//! patient. Every inventory mutation writes its adherence event and adjusts
//! `pills_remaining` inside one scoped session, so both commit or neither
//! does. A mutation against an unknown medication rolls back without writing
//! an event.
//!
//! Every medication read is scoped to the owning patient and checks the
//! stored `shard_id` against routing. Each mutation bumps the medication's
//! `event_count` before writing its event and stamps the event with the new
//! count, so the row lock taken by that update orders events on a live shard
//! even when they share a millisecond.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use shardvault_core::AuditSink;
use shardvault_core::ShardId;
use shardvault_core::ShardRouter;
use shardvault_core::TenantId;
use uuid::Uuid;

use crate::manager::ConnectionPoolManager;
use crate::manager::ScopedConnection;
use crate::repository::RepositoryError;
use crate::repository::ensure_routed;
use crate::repository::integer;
use crate::repository::now_ms;
use crate::repository::optional_integer;
use crate::repository::optional_text;
use crate::repository::shard_value;
use crate::repository::stored_shard;
use crate::repository::text;
use crate::schema::Row;
use crate::schema::Select;
use crate::schema::Table;
use crate::schema::Update;
use crate::schema::Value;
use crate::schema::row;
use crate::session::ShardSession;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Refill threshold applied when a medication does not specify one.
pub const DEFAULT_REFILL_THRESHOLD: i64 = 5;

/// Window used by callers that do not choose one for adherence rates.
pub const DEFAULT_ADHERENCE_WINDOW_DAYS: u32 = 7;

/// Milliseconds in one day.
const MS_PER_DAY: i64 = 86_400_000;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Adherence event classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdherenceEventType {
    /// Dose taken; decrements inventory.
    Taken,
    /// Dose missed; inventory unchanged.
    Missed,
    /// Pills lost or discarded; decrements inventory.
    Wastage,
    /// Pills added; increments inventory.
    Refill,
}

impl AdherenceEventType {
    /// Returns the stored label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Taken => "taken",
            Self::Missed => "missed",
            Self::Wastage => "wastage",
            Self::Refill => "refill",
        }
    }

    /// Parses a stored label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "taken" => Some(Self::Taken),
            "missed" => Some(Self::Missed),
            "wastage" => Some(Self::Wastage),
            "refill" => Some(Self::Refill),
            _ => None,
        }
    }
}

/// Medication to register for a patient.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewMedication {
    /// Drug name.
    pub drug_name: String,
    /// Strength label, e.g. `500mg`.
    pub strength: String,
    /// Frequency label, e.g. `BID`.
    pub frequency: String,
    /// Pills dispensed.
    pub total_pills: i64,
    /// Remaining-pill count at or below which a refill is due.
    pub refill_threshold: Option<i64>,
    /// Scheduled doses per day; derived from `frequency` when absent.
    #[serde(default)]
    pub doses_per_day: Option<i64>,
    /// Dispensing pharmacy.
    #[serde(default)]
    pub pharmacy_name: Option<String>,
    /// Dispensing pharmacy phone number.
    #[serde(default)]
    pub pharmacy_phone: Option<String>,
}

/// Stored medication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Medication {
    /// Medication identifier.
    pub medication_id: String,
    /// Owning patient.
    pub patient_id: TenantId,
    /// Drug name.
    pub drug_name: String,
    /// Strength label.
    pub strength: String,
    /// Frequency label.
    pub frequency: String,
    /// Pills dispensed.
    pub total_pills: i64,
    /// Pills on hand.
    pub pills_remaining: i64,
    /// Refill threshold.
    pub refill_threshold: i64,
    /// Scheduled doses per day.
    pub doses_per_day: i64,
    /// Adherence events recorded so far.
    pub event_count: i64,
    /// Dispensing pharmacy.
    pub pharmacy_name: Option<String>,
    /// Dispensing pharmacy phone number.
    pub pharmacy_phone: Option<String>,
    /// Last dose time (milliseconds since epoch).
    pub last_taken_at_ms: Option<i64>,
    /// Shard holding the record.
    pub shard_id: ShardId,
    /// Creation time (milliseconds since epoch).
    pub created_at_ms: i64,
}

impl Medication {
    /// Returns whether the remaining count is at or below the threshold.
    #[must_use]
    pub const fn needs_refill(&self) -> bool {
        self.pills_remaining <= self.refill_threshold
    }

    /// Decodes a stored row.
    fn from_row(row: &Row) -> Result<Self, RepositoryError> {
        Ok(Self {
            medication_id: text(row, "medication_id")?,
            patient_id: TenantId::new(text(row, "patient_id")?),
            drug_name: text(row, "drug_name")?,
            strength: text(row, "strength")?,
            frequency: text(row, "frequency")?,
            total_pills: integer(row, "total_pills")?,
            pills_remaining: integer(row, "pills_remaining")?,
            refill_threshold: integer(row, "refill_threshold")?,
            doses_per_day: integer(row, "doses_per_day")?,
            event_count: integer(row, "event_count")?,
            pharmacy_name: optional_text(row, "pharmacy_name")?,
            pharmacy_phone: optional_text(row, "pharmacy_phone")?,
            last_taken_at_ms: optional_integer(row, "last_taken_at")?,
            shard_id: stored_shard(row)?,
            created_at_ms: integer(row, "created_at")?,
        })
    }
}

/// Stored adherence event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdherenceEvent {
    /// Event identifier.
    pub event_id: String,
    /// Medication the event belongs to.
    pub medication_id: String,
    /// Position in the medication's event log, starting at 1.
    pub sequence: i64,
    /// Event classification.
    pub event_type: AdherenceEventType,
    /// Pills affected.
    pub pills_count: i64,
    /// Scheduled dose time, when known.
    pub scheduled_at_ms: Option<i64>,
    /// Recording time (milliseconds since epoch).
    pub recorded_at_ms: i64,
}

impl AdherenceEvent {
    /// Decodes a stored row.
    fn from_row(row: &Row) -> Result<Self, RepositoryError> {
        let label = text(row, "event_type")?;
        let event_type = AdherenceEventType::parse(&label)
            .ok_or_else(|| RepositoryError::Corrupt(format!("unknown event type {label}")))?;
        Ok(Self {
            event_id: text(row, "event_id")?,
            medication_id: text(row, "medication_id")?,
            sequence: integer(row, "sequence")?,
            event_type,
            pills_count: integer(row, "pills_count")?,
            scheduled_at_ms: optional_integer(row, "scheduled_at")?,
            recorded_at_ms: integer(row, "recorded_at")?,
        })
    }
}

// ============================================================================
// SECTION: Ledger
// ============================================================================

/// Medication inventory and adherence log.
#[derive(Clone)]
pub struct MedicationLedger {
    /// Shard router.
    router: ShardRouter,
    /// Shard connections.
    pools: Arc<ConnectionPoolManager>,
    /// Sink for shard mismatches.
    audit: Arc<dyn AuditSink>,
}

impl MedicationLedger {
    /// Creates a ledger.
    #[must_use]
    pub const fn new(
        router: ShardRouter,
        pools: Arc<ConnectionPoolManager>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            router,
            pools,
            audit,
        }
    }

    /// Registers a medication for `patient_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Invalid`] for negative counts or
    /// non-positive doses per day and [`RepositoryError`] when the insert
    /// fails.
    pub fn add_medication(
        &self,
        patient_id: &TenantId,
        medication: NewMedication,
    ) -> Result<Medication, RepositoryError> {
        if medication.total_pills < 0 {
            return Err(RepositoryError::Invalid("total_pills must not be negative".to_string()));
        }
        let refill_threshold = medication.refill_threshold.unwrap_or(DEFAULT_REFILL_THRESHOLD);
        if refill_threshold < 0 {
            return Err(RepositoryError::Invalid(
                "refill_threshold must not be negative".to_string(),
            ));
        }
        let doses_per_day = medication
            .doses_per_day
            .unwrap_or_else(|| doses_per_day_for(&medication.frequency));
        if doses_per_day <= 0 {
            return Err(RepositoryError::Invalid("doses_per_day must be positive".to_string()));
        }
        let shard_id = self.router.shard_id(patient_id);
        let stored = Medication {
            medication_id: Uuid::new_v4().to_string(),
            patient_id: patient_id.clone(),
            drug_name: medication.drug_name,
            strength: medication.strength,
            frequency: medication.frequency,
            total_pills: medication.total_pills,
            pills_remaining: medication.total_pills,
            refill_threshold,
            doses_per_day,
            event_count: 0,
            pharmacy_name: medication.pharmacy_name,
            pharmacy_phone: medication.pharmacy_phone,
            last_taken_at_ms: None,
            shard_id,
            created_at_ms: now_ms(),
        };
        let record = row([
            ("medication_id", Value::from(stored.medication_id.as_str())),
            ("patient_id", Value::from(patient_id.as_str())),
            ("drug_name", Value::from(stored.drug_name.as_str())),
            ("strength", Value::from(stored.strength.as_str())),
            ("frequency", Value::from(stored.frequency.as_str())),
            ("total_pills", Value::from(stored.total_pills)),
            ("pills_remaining", Value::from(stored.pills_remaining)),
            ("refill_threshold", Value::from(stored.refill_threshold)),
            ("doses_per_day", Value::from(stored.doses_per_day)),
            ("event_count", Value::from(stored.event_count)),
            ("pharmacy_name", Value::from(stored.pharmacy_name.clone())),
            ("pharmacy_phone", Value::from(stored.pharmacy_phone.clone())),
            ("shard_id", shard_value(shard_id)),
            ("created_at", Value::from(stored.created_at_ms)),
        ]);
        self.pools.with_connection(shard_id, |conn| {
            conn.insert(Table::Medications, record).map_err(RepositoryError::from)
        })?;
        Ok(stored)
    }

    /// Loads a medication owned by `patient_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Routing`] when the stored shard disagrees
    /// with routing and [`RepositoryError`] when the read fails or the row is
    /// corrupt.
    pub fn get_medication(
        &self,
        patient_id: &TenantId,
        medication_id: &str,
    ) -> Result<Option<Medication>, RepositoryError> {
        let shard_id = self.router.shard_id(patient_id);
        self.pools.with_connection(shard_id, |conn| self.fetch(conn, patient_id, medication_id))
    }

    /// Lists medications owned by `patient_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Routing`] when any stored shard disagrees
    /// with routing and [`RepositoryError`] when the read fails or a row is
    /// corrupt.
    pub fn list_medications(
        &self,
        patient_id: &TenantId,
    ) -> Result<Vec<Medication>, RepositoryError> {
        let shard_id = self.router.shard_id(patient_id);
        let query = Select::table(Table::Medications)
            .filter("patient_id", patient_id.as_str())
            .order_by("created_at");
        self.pools.with_connection(shard_id, |conn| {
            conn.select(&query)?.iter().map(|found| self.decode(patient_id, found)).collect()
        })
    }

    /// Records a dose and decrements inventory. Returns pills remaining.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] for unknown medications and
    /// [`RepositoryError::Invalid`] for non-positive counts.
    pub fn record_taken(
        &self,
        patient_id: &TenantId,
        medication_id: &str,
        pills_count: i64,
        scheduled_at_ms: Option<i64>,
    ) -> Result<i64, RepositoryError> {
        let taken_at = now_ms();
        let update = Update::table(Table::Medications)
            .add("pills_remaining", -positive(pills_count)?)
            .set("last_taken_at", taken_at);
        self.adjust(
            patient_id,
            medication_id,
            AdherenceEventType::Taken,
            pills_count,
            scheduled_at_ms,
            update,
        )
    }

    /// Records a missed dose. Inventory is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] for unknown medications.
    pub fn record_missed(
        &self,
        patient_id: &TenantId,
        medication_id: &str,
        scheduled_at_ms: i64,
    ) -> Result<(), RepositoryError> {
        self.adjust(
            patient_id,
            medication_id,
            AdherenceEventType::Missed,
            0,
            Some(scheduled_at_ms),
            Update::table(Table::Medications),
        )?;
        Ok(())
    }

    /// Records lost or discarded pills. Returns pills remaining.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] for unknown medications and
    /// [`RepositoryError::Invalid`] for non-positive counts.
    pub fn record_wastage(
        &self,
        patient_id: &TenantId,
        medication_id: &str,
        pills_count: i64,
    ) -> Result<i64, RepositoryError> {
        let update =
            Update::table(Table::Medications).add("pills_remaining", -positive(pills_count)?);
        self.adjust(
            patient_id,
            medication_id,
            AdherenceEventType::Wastage,
            pills_count,
            None,
            update,
        )
    }

    /// Records a refill. Returns pills remaining.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] for unknown medications and
    /// [`RepositoryError::Invalid`] for non-positive counts.
    pub fn record_refill(
        &self,
        patient_id: &TenantId,
        medication_id: &str,
        pills_count: i64,
    ) -> Result<i64, RepositoryError> {
        let update =
            Update::table(Table::Medications).add("pills_remaining", positive(pills_count)?);
        self.adjust(
            patient_id,
            medication_id,
            AdherenceEventType::Refill,
            pills_count,
            None,
            update,
        )
    }

    /// Lists a medication's adherence events in recording order.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] when `patient_id` does not own
    /// the medication and [`RepositoryError`] when the read fails or a row is
    /// corrupt.
    pub fn list_events(
        &self,
        patient_id: &TenantId,
        medication_id: &str,
    ) -> Result<Vec<AdherenceEvent>, RepositoryError> {
        let shard_id = self.router.shard_id(patient_id);
        let query = Select::table(Table::AdherenceEvents)
            .filter("medication_id", medication_id)
            .order_by("sequence")
            .order_by("recorded_at");
        self.pools.with_connection(shard_id, |conn| {
            self.require(conn, patient_id, medication_id)?;
            conn.select(&query)?.iter().map(AdherenceEvent::from_row).collect()
        })
    }

    /// Returns medications with stock left but at or below their threshold,
    /// lowest stock first.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when the read fails or a row is corrupt.
    pub fn needs_refill(&self, patient_id: &TenantId) -> Result<Vec<Medication>, RepositoryError> {
        let mut due: Vec<Medication> = self
            .list_medications(patient_id)?
            .into_iter()
            .filter(|medication| medication.pills_remaining > 0 && medication.needs_refill())
            .collect();
        due.sort_by_key(|medication| medication.pills_remaining);
        Ok(due)
    }

    /// Returns taken doses over the last `days` days as a percentage of the
    /// doses scheduled in that window.
    ///
    /// Extra recorded doses can push the rate above 100.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Invalid`] for a zero-day window,
    /// [`RepositoryError::NotFound`] when `patient_id` does not own the
    /// medication, and [`RepositoryError`] when the read fails.
    pub fn adherence_rate(
        &self,
        patient_id: &TenantId,
        medication_id: &str,
        days: u32,
    ) -> Result<f64, RepositoryError> {
        if days == 0 {
            return Err(RepositoryError::Invalid("days must be positive".to_string()));
        }
        let since = now_ms().saturating_sub(i64::from(days).saturating_mul(MS_PER_DAY));
        let shard_id = self.router.shard_id(patient_id);
        let query = Select::table(Table::AdherenceEvents)
            .filter("medication_id", medication_id)
            .filter("event_type", AdherenceEventType::Taken.as_str())
            .columns(&["recorded_at"]);
        self.pools.with_connection(shard_id, |conn| {
            let medication = self.require(conn, patient_id, medication_id)?;
            let recorded = conn
                .select(&query)?
                .iter()
                .map(|found| integer(found, "recorded_at"))
                .collect::<Result<Vec<i64>, _>>()?;
            let taken = recorded.iter().filter(|at| **at >= since).count();
            let expected = medication.doses_per_day.saturating_mul(i64::from(days));
            Ok(percent(taken, expected))
        })
    }

    /// Writes an adherence event and the matching inventory change in one
    /// session. Returns pills remaining afterwards.
    fn adjust(
        &self,
        patient_id: &TenantId,
        medication_id: &str,
        event_type: AdherenceEventType,
        pills_count: i64,
        scheduled_at_ms: Option<i64>,
        inventory: Update,
    ) -> Result<i64, RepositoryError> {
        let shard_id = self.router.shard_id(patient_id);
        let update = inventory
            .add("event_count", 1)
            .filter("medication_id", medication_id)
            .filter("patient_id", patient_id.as_str());
        self.pools.with_connection(shard_id, |conn| {
            self.require(conn, patient_id, medication_id)?;
            conn.update(&update)?;
            let current = self.require(conn, patient_id, medication_id)?;
            let event = row([
                ("event_id", Value::from(Uuid::new_v4().to_string())),
                ("medication_id", Value::from(medication_id)),
                ("sequence", Value::from(current.event_count)),
                ("event_type", Value::from(event_type.as_str())),
                ("pills_count", Value::from(pills_count)),
                ("scheduled_at", Value::from(scheduled_at_ms)),
                ("recorded_at", Value::from(now_ms())),
            ]);
            conn.insert(Table::AdherenceEvents, event)?;
            Ok(current.pills_remaining)
        })
    }

    /// Loads a medication owned by `patient_id` inside an open session.
    fn fetch(
        &self,
        conn: &mut ScopedConnection,
        patient_id: &TenantId,
        medication_id: &str,
    ) -> Result<Option<Medication>, RepositoryError> {
        let query = Select::table(Table::Medications)
            .filter("medication_id", medication_id)
            .filter("patient_id", patient_id.as_str());
        conn.select_one(&query)?.map(|found| self.decode(patient_id, &found)).transpose()
    }

    /// Loads a medication owned by `patient_id` or reports it missing.
    fn require(
        &self,
        conn: &mut ScopedConnection,
        patient_id: &TenantId,
        medication_id: &str,
    ) -> Result<Medication, RepositoryError> {
        self.fetch(conn, patient_id, medication_id)?
            .ok_or_else(|| RepositoryError::NotFound(format!("medication {medication_id}")))
    }

    /// Decodes a medication row and checks its shard against routing.
    fn decode(&self, patient_id: &TenantId, found: &Row) -> Result<Medication, RepositoryError> {
        let medication = Medication::from_row(found)?;
        ensure_routed(&self.router, self.audit.as_ref(), patient_id, medication.shard_id)?;
        Ok(medication)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns `pills_count` after checking it is positive.
fn positive(pills_count: i64) -> Result<i64, RepositoryError> {
    if pills_count <= 0 {
        return Err(RepositoryError::Invalid("pills_count must be positive".to_string()));
    }
    Ok(pills_count)
}

/// Returns scheduled doses per day for a frequency label.
///
/// Accepts the usual abbreviations (`QD`, `BID`, `TID`, `QID`, `QHS`, ...)
/// and dose patterns such as `1-0-1`. Unrecognized labels count as one dose.
#[must_use]
pub fn doses_per_day_for(frequency: &str) -> i64 {
    let label = frequency.trim().to_ascii_uppercase();
    match label.as_str() {
        "BID" | "BD" | "TWICE DAILY" | "2X/DAY" => 2,
        "TID" | "TD" | "THRICE DAILY" | "3X/DAY" => 3,
        "QID" | "4X/DAY" => 4,
        _ => dose_pattern(&label).filter(|doses| *doses > 0).unwrap_or(1),
    }
}

/// Sums a dose pattern such as `1-0-1`.
fn dose_pattern(label: &str) -> Option<i64> {
    if !label.contains('-') {
        return None;
    }
    label.split('-').map(|part| part.parse::<i64>().ok()).sum()
}

/// Returns `taken / expected` as a percentage; zero when nothing is expected.
fn percent(taken: usize, expected: i64) -> f64 {
    if expected <= 0 {
        return 0.0;
    }
    let taken = u32::try_from(taken).map_or(f64::from(u32::MAX), f64::from);
    let expected = u32::try_from(expected).map_or(f64::from(u32::MAX), f64::from);
    taken / expected * 100.0
}

// ============================================================================
// SECTION: Tests
// ============================================================================
