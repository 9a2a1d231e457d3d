// crates/shardvault-store/tests/repositories.rs
// ============================================================================
// Module: Repository Tests
// Description: Tests for encrypted patient records and the medication ledger.
// ============================================================================
//! ## Overview
//! Runs both repositories against in-memory shards: encryption at rest,
//! routing checks on read, per-patient scoping, and atomic inventory
//! adjustments.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::sync::Arc;
use std::thread;

use shardvault_core::AuditKind;
use shardvault_core::KeyManager;
use shardvault_core::MasterKeyMode;
use shardvault_core::MemoryAuditSink;
use shardvault_core::RoutingError;
use shardvault_core::ShardId;
use shardvault_core::ShardRouter;
use shardvault_core::TenantId;
use shardvault_store::AdherenceEventType;
use shardvault_store::ConnectionPoolManager;
use shardvault_store::DEFAULT_ADHERENCE_WINDOW_DAYS;
use shardvault_store::MedicationLedger;
use shardvault_store::NewMedication;
use shardvault_store::PatientRepository;
use shardvault_store::RepositoryError;
use shardvault_store::Select;
use shardvault_store::ShardSession;
use shardvault_store::Table;
use shardvault_store::Update;
use shardvault_store::Value;

// ============================================================================
// SECTION: Fixture
// ============================================================================

const PATIENT: &str = "550e8400-e29b-41d4-a716-446655440000";

struct Fixture {
    router: ShardRouter,
    pools: Arc<ConnectionPoolManager>,
    audit: Arc<MemoryAuditSink>,
    patients: PatientRepository,
    ledger: MedicationLedger,
}

fn fixture() -> Fixture {
    let audit = Arc::new(MemoryAuditSink::new());
    let router = ShardRouter::new(2).unwrap();
    let pools = Arc::new(ConnectionPoolManager::new(audit.clone()));
    for shard in router.shard_ids() {
        pools.add_memory_shard(shard).unwrap();
    }
    let keys = Arc::new(KeyManager::new("repository-test-master-secret", MasterKeyMode::Hkdf).unwrap());
    Fixture {
        router,
        pools: pools.clone(),
        audit: audit.clone(),
        patients: PatientRepository::new(keys, router, pools.clone(), audit.clone()),
        ledger: MedicationLedger::new(router, pools, audit),
    }
}

fn metformin(total_pills: i64) -> NewMedication {
    NewMedication {
        drug_name: "Metformin".to_string(),
        strength: "500mg".to_string(),
        frequency: "BID".to_string(),
        total_pills,
        refill_threshold: None,
        doses_per_day: None,
        pharmacy_name: None,
        pharmacy_phone: None,
    }
}

fn stored_events(fx: &Fixture, shard: ShardId) -> usize {
    fx.pools
        .with_connection(shard, |conn| {
            conn.select(&Select::table(Table::AdherenceEvents)).map_err(RepositoryError::from)
        })
        .unwrap()
        .len()
}

fn stranger_on(fx: &Fixture, shard: ShardId) -> TenantId {
    (0..64)
        .map(|index| TenantId::new(format!("stranger-{index}")))
        .find(|candidate| fx.router.shard_id(candidate) == shard)
        .unwrap()
}

// ============================================================================
// SECTION: Patients
// ============================================================================

#[test]
fn test_patient_round_trips_through_routed_shard() {
    let fx = fixture();
    let patient_id = TenantId::new(PATIENT);

    let created = fx
        .patients
        .create_patient_with_id(patient_id.clone(), "Arjun Gopal", "Type 2 diabetes")
        .unwrap();
    let loaded = fx.patients.get_patient(&patient_id).unwrap().unwrap();

    assert_eq!(created.shard_id, fx.router.shard_id(&patient_id));
    assert_eq!(loaded, created);
}

#[test]
fn test_patient_fields_are_encrypted_at_rest() {
    let fx = fixture();
    let created = fx.patients.create_patient("Arjun Gopal", "Type 2 diabetes").unwrap();

    let stored = fx
        .pools
        .with_connection(created.shard_id, |conn| {
            conn.select_one(
                &Select::table(Table::PatientRecords)
                    .filter("patient_id", created.patient_id.as_str()),
            )
            .map_err(RepositoryError::from)
        })
        .unwrap()
        .unwrap();

    let name_blob = stored.get("encrypted_name").and_then(Value::as_bytes).unwrap();
    assert!(!name_blob.windows(5).any(|window| window == b"Arjun"));
    assert_eq!(name_blob.len(), 12 + "Arjun Gopal".len() + 16);
}

#[test]
fn test_missing_patient_is_none() {
    let fx = fixture();
    assert!(fx.patients.get_patient(&TenantId::new("no-such-patient")).unwrap().is_none());
}

#[test]
fn test_update_patient_replaces_supplied_fields_only() {
    let fx = fixture();
    let created = fx.patients.create_patient("Arjun Gopal", "Type 2 diabetes").unwrap();

    assert!(!fx.patients.update_patient(&created.patient_id, None, None).unwrap());
    assert!(fx.patients.update_patient(&created.patient_id, None, Some("Hypertension")).unwrap());
    assert!(!fx.patients.update_patient(&TenantId::new("ghost"), Some("x"), None).unwrap());

    let loaded = fx.patients.get_patient(&created.patient_id).unwrap().unwrap();
    assert_eq!(loaded.name, "Arjun Gopal");
    assert_eq!(loaded.medical_history, "Hypertension");
}

#[test]
fn test_shard_mismatch_is_fatal_and_audited() {
    let fx = fixture();
    let patient_id = TenantId::new(PATIENT);
    let created = fx.patients.create_patient_with_id(patient_id.clone(), "Arjun Gopal", "").unwrap();
    let wrong = i64::from((created.shard_id.get() + 1) % 2);
    fx.pools
        .with_connection(created.shard_id, |conn| {
            conn.update(
                &Update::table(Table::PatientRecords)
                    .set("shard_id", wrong)
                    .filter("patient_id", PATIENT),
            )
            .map_err(RepositoryError::from)
        })
        .unwrap();

    let err = fx.patients.get_patient(&patient_id).unwrap_err();

    assert!(matches!(err, RepositoryError::Routing(RoutingError::ShardMismatch { .. })));
    assert!(err.is_integrity_failure());
    assert!(!err.is_retryable());
    let mismatch = fx
        .audit
        .events()
        .into_iter()
        .find(|event| event.kind == AuditKind::ShardMismatch)
        .unwrap();
    assert_eq!(mismatch.tenant.as_deref(), Some("550e8400..."));
}

#[test]
fn test_tampered_blob_fails_integrity_and_is_audited() {
    let fx = fixture();
    let created = fx.patients.create_patient("Arjun Gopal", "history").unwrap();
    let other = fx.patients.create_patient("Someone Else", "history").unwrap();
    let foreign_blob = fx
        .pools
        .with_connection(other.shard_id, |conn| {
            conn.select_one(
                &Select::table(Table::PatientRecords)
                    .filter("patient_id", other.patient_id.as_str())
                    .columns(&["encrypted_name"]),
            )
            .map_err(RepositoryError::from)
        })
        .unwrap()
        .unwrap()
        .remove("encrypted_name")
        .unwrap();
    fx.pools
        .with_connection(created.shard_id, |conn| {
            conn.update(
                &Update::table(Table::PatientRecords)
                    .set("encrypted_name", foreign_blob)
                    .filter("patient_id", created.patient_id.as_str()),
            )
            .map_err(RepositoryError::from)
        })
        .unwrap();

    let err = fx.patients.get_patient(&created.patient_id).unwrap_err();

    assert!(err.is_integrity_failure());
    assert!(fx.audit.kinds().contains(&AuditKind::DecryptFailed));
}

// ============================================================================
// SECTION: Medication Ledger
// ============================================================================

#[test]
fn test_inventory_tracks_taken_wastage_and_refill() {
    let fx = fixture();
    let patient = TenantId::new(PATIENT);
    let med = fx.ledger.add_medication(&patient, metformin(30)).unwrap();
    assert_eq!(med.refill_threshold, 5);
    assert_eq!(med.pills_remaining, 30);

    assert_eq!(fx.ledger.record_taken(&patient, &med.medication_id, 2, Some(1_000)).unwrap(), 28);
    assert_eq!(fx.ledger.record_wastage(&patient, &med.medication_id, 3).unwrap(), 25);
    fx.ledger.record_missed(&patient, &med.medication_id, 2_000).unwrap();
    assert_eq!(fx.ledger.record_refill(&patient, &med.medication_id, 10).unwrap(), 35);

    let events = fx.ledger.list_events(&patient, &med.medication_id).unwrap();
    let types: Vec<AdherenceEventType> = events.iter().map(|event| event.event_type).collect();
    assert_eq!(types, vec![
        AdherenceEventType::Taken,
        AdherenceEventType::Wastage,
        AdherenceEventType::Missed,
        AdherenceEventType::Refill,
    ]);
    assert_eq!(events[0].scheduled_at_ms, Some(1_000));
    assert_eq!(events[1].scheduled_at_ms, None);

    let stored = fx.ledger.get_medication(&patient, &med.medication_id).unwrap().unwrap();
    assert_eq!(stored.pills_remaining, 35);
    assert!(stored.last_taken_at_ms.is_some());
}

#[test]
fn test_unknown_medication_writes_no_event() {
    let fx = fixture();
    let patient = TenantId::new(PATIENT);

    let err = fx.ledger.record_taken(&patient, "no-such-med", 1, None).unwrap_err();

    assert!(matches!(err, RepositoryError::NotFound(_)));
    assert_eq!(stored_events(&fx, fx.router.shard_id(&patient)), 0);
}

#[test]
fn test_non_positive_counts_are_rejected() {
    let fx = fixture();
    let patient = TenantId::new(PATIENT);
    let med = fx.ledger.add_medication(&patient, metformin(10)).unwrap();

    assert!(matches!(
        fx.ledger.record_taken(&patient, &med.medication_id, 0, None),
        Err(RepositoryError::Invalid(_))
    ));
    assert!(matches!(
        fx.ledger.record_refill(&patient, &med.medication_id, -4),
        Err(RepositoryError::Invalid(_))
    ));
    assert!(matches!(fx.ledger.add_medication(&patient, metformin(-1)), Err(RepositoryError::Invalid(_))));
    assert!(fx.ledger.list_events(&patient, &med.medication_id).unwrap().is_empty());
}

#[test]
fn test_needs_refill_lists_low_but_nonempty_stock() {
    let fx = fixture();
    let patient = TenantId::new(PATIENT);
    let plenty = fx.ledger.add_medication(&patient, metformin(30)).unwrap();
    let low = fx.ledger.add_medication(&patient, metformin(4)).unwrap();
    let lower = fx.ledger.add_medication(&patient, metformin(2)).unwrap();
    let empty = fx.ledger.add_medication(&patient, metformin(1)).unwrap();
    fx.ledger.record_taken(&patient, &empty.medication_id, 1, None).unwrap();

    let due: Vec<String> =
        fx.ledger.needs_refill(&patient).unwrap().into_iter().map(|med| med.medication_id).collect();

    assert_eq!(due, vec![lower.medication_id, low.medication_id]);
    assert!(!due.contains(&plenty.medication_id));
}

#[test]
fn test_concurrent_refills_are_not_lost() {
    let fx = fixture();
    let patient = TenantId::new(PATIENT);
    let med = fx.ledger.add_medication(&patient, metformin(0)).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ledger = fx.ledger.clone();
            let patient = patient.clone();
            let medication_id = med.medication_id.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    ledger.record_refill(&patient, &medication_id, 1).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stored = fx.ledger.get_medication(&patient, &med.medication_id).unwrap().unwrap();
    assert_eq!(stored.pills_remaining, 40);
    assert_eq!(fx.ledger.list_events(&patient, &med.medication_id).unwrap().len(), 40);
}

#[test]
fn test_medications_are_scoped_to_owning_patient() {
    let fx = fixture();
    let owner = TenantId::new(PATIENT);
    let med = fx.ledger.add_medication(&owner, metformin(10)).unwrap();
    fx.ledger.record_taken(&owner, &med.medication_id, 1, None).unwrap();
    let stranger = stranger_on(&fx, med.shard_id);

    assert!(fx.ledger.get_medication(&stranger, &med.medication_id).unwrap().is_none());
    assert!(fx.ledger.list_medications(&stranger).unwrap().is_empty());
    assert!(matches!(
        fx.ledger.record_wastage(&stranger, &med.medication_id, 1),
        Err(RepositoryError::NotFound(_))
    ));
    assert!(matches!(
        fx.ledger.list_events(&stranger, &med.medication_id),
        Err(RepositoryError::NotFound(_))
    ));
    assert!(matches!(
        fx.ledger.adherence_rate(&stranger, &med.medication_id, 7),
        Err(RepositoryError::NotFound(_))
    ));
    assert_eq!(fx.ledger.list_events(&owner, &med.medication_id).unwrap().len(), 1);
    assert_eq!(med.shard_id, fx.router.shard_id(&owner));
}

#[test]
fn test_medication_shard_mismatch_is_fatal_and_audited() {
    let fx = fixture();
    let patient = TenantId::new(PATIENT);
    let med = fx.ledger.add_medication(&patient, metformin(10)).unwrap();
    let wrong = i64::from((med.shard_id.get() + 1) % 2);
    fx.pools
        .with_connection(med.shard_id, |conn| {
            conn.update(
                &Update::table(Table::Medications)
                    .set("shard_id", wrong)
                    .filter("medication_id", med.medication_id.as_str()),
            )
            .map_err(RepositoryError::from)
        })
        .unwrap();

    let err = fx.ledger.get_medication(&patient, &med.medication_id).unwrap_err();
    assert!(matches!(err, RepositoryError::Routing(RoutingError::ShardMismatch { .. })));
    assert!(err.is_integrity_failure());
    assert!(fx.ledger.list_medications(&patient).unwrap_err().is_integrity_failure());
    assert!(fx.ledger.needs_refill(&patient).unwrap_err().is_integrity_failure());
    let taken = fx.ledger.record_taken(&patient, &med.medication_id, 1, None).unwrap_err();
    assert!(taken.is_integrity_failure());
    assert_eq!(stored_events(&fx, med.shard_id), 0);

    let mismatches: Vec<_> = fx
        .audit
        .events()
        .into_iter()
        .filter(|event| event.kind == AuditKind::ShardMismatch)
        .collect();
    assert_eq!(mismatches.len(), 4);
    assert_eq!(mismatches[0].tenant.as_deref(), Some("550e8400..."));
}

#[test]
fn test_events_carry_gapless_sequence() {
    let fx = fixture();
    let patient = TenantId::new(PATIENT);
    let med = fx.ledger.add_medication(&patient, metformin(20)).unwrap();
    for _ in 0..3 {
        fx.ledger.record_taken(&patient, &med.medication_id, 1, None).unwrap();
    }
    fx.ledger.record_missed(&patient, &med.medication_id, 5).unwrap();
    fx.ledger.record_refill(&patient, &med.medication_id, 4).unwrap();

    let events = fx.ledger.list_events(&patient, &med.medication_id).unwrap();

    let sequences: Vec<i64> = events.iter().map(|event| event.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    assert_eq!(events[3].event_type, AdherenceEventType::Missed);
    let stored = fx.ledger.get_medication(&patient, &med.medication_id).unwrap().unwrap();
    assert_eq!(stored.event_count, 5);
}

#[test]
fn test_adherence_rate_counts_taken_doses_against_schedule() {
    let fx = fixture();
    let patient = TenantId::new(PATIENT);
    let med = fx.ledger.add_medication(&patient, metformin(30)).unwrap();
    assert_eq!(med.doses_per_day, 2);
    for _ in 0..3 {
        fx.ledger.record_taken(&patient, &med.medication_id, 1, None).unwrap();
    }
    fx.ledger.record_missed(&patient, &med.medication_id, 0).unwrap();
    fx.ledger.record_refill(&patient, &med.medication_id, 5).unwrap();

    let week =
        fx.ledger.adherence_rate(&patient, &med.medication_id, DEFAULT_ADHERENCE_WINDOW_DAYS).unwrap();
    let day = fx.ledger.adherence_rate(&patient, &med.medication_id, 1).unwrap();

    assert!((week - 300.0 / 14.0).abs() < 1e-9);
    assert!((day - 150.0).abs() < 1e-9);
    assert!(matches!(
        fx.ledger.adherence_rate(&patient, &med.medication_id, 0),
        Err(RepositoryError::Invalid(_))
    ));
    assert!(matches!(
        fx.ledger.adherence_rate(&patient, "no-such-med", 7),
        Err(RepositoryError::NotFound(_))
    ));
}

#[test]
fn test_pharmacy_contact_is_returned_with_refills() {
    let fx = fixture();
    let patient = TenantId::new(PATIENT);
    let mut request = metformin(3);
    request.frequency = "TID".to_string();
    request.pharmacy_name = Some("Apollo Pharmacy".to_string());
    request.pharmacy_phone = Some("+91-80-5555-0100".to_string());
    let med = fx.ledger.add_medication(&patient, request).unwrap();

    let due = fx.ledger.needs_refill(&patient).unwrap();

    assert_eq!(due.len(), 1);
    assert_eq!(due[0].medication_id, med.medication_id);
    assert_eq!(due[0].doses_per_day, 3);
    assert_eq!(due[0].pharmacy_name.as_deref(), Some("Apollo Pharmacy"));
    assert_eq!(due[0].pharmacy_phone.as_deref(), Some("+91-80-5555-0100"));
    let mut invalid = metformin(3);
    invalid.doses_per_day = Some(0);
    assert!(matches!(fx.ledger.add_medication(&patient, invalid), Err(RepositoryError::Invalid(_))));
}
