//! Durability tests: counters and records must survive a store restart.
//!
//! Run with: cargo test --test crash_recovery_tests

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tempfile::TempDir;

use frontdesk::contracts::{ClinicStore, CounterStore, NewPatient, PatientQuery, SequenceType};
use frontdesk::storage::{RocksDbClinicStore, SequenceFormat};

fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 14, 0, 0).unwrap()
}

#[test]
fn counters_resume_after_reopen() {
    let dir = TempDir::new().unwrap();
    let now = at(2025, 12, 12);

    {
        let store = RocksDbClinicStore::open(dir.path(), SequenceFormat::default()).unwrap();
        for _ in 0..3 {
            store
                .sequence()
                .issue_standalone(SequenceType::Registration, now, &store)
                .unwrap();
        }
    }

    // Reopen from the same path; the counter continues where it left off
    let store = RocksDbClinicStore::open(dir.path(), SequenceFormat::default()).unwrap();
    assert_eq!(
        store
            .last_committed(now.date_naive(), SequenceType::Registration)
            .unwrap(),
        Some(3)
    );

    let code = store
        .sequence()
        .issue_standalone(SequenceType::Registration, now, &store)
        .unwrap();
    assert_eq!(code, "251212000004");
}

#[test]
fn records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let now = at(2025, 12, 12);

    let created = {
        let store = RocksDbClinicStore::open(dir.path(), SequenceFormat::default()).unwrap();
        store
            .create_patient(
                NewPatient {
                    full_name: "Siti Rahma".into(),
                    date_of_birth: NaiveDate::from_ymd_opt(1985, 5, 20).unwrap(),
                    phone: Some("0812345678".into()),
                    address: None,
                    photo_url: None,
                    gender: None,
                },
                now,
            )
            .unwrap()
    };

    let store = RocksDbClinicStore::open(dir.path(), SequenceFormat::default()).unwrap();
    let patients = store
        .list_patients(&PatientQuery {
            rm: Some(created.medical_record_no.clone()),
            limit: 10,
            ..Default::default()
        })
        .unwrap();

    assert_eq!(patients.len(), 1);
    assert_eq!(patients[0].patient.full_name, "Siti Rahma");
    assert_eq!(
        patients[0].patient.medical_record_no,
        created.medical_record_no
    );

    // Subsequent patient creation continues the id and counter sequences
    let next = store
        .create_patient(
            NewPatient {
                full_name: "Budi Santoso".into(),
                date_of_birth: NaiveDate::from_ymd_opt(1970, 1, 2).unwrap(),
                phone: None,
                address: None,
                photo_url: None,
                gender: None,
            },
            now,
        )
        .unwrap();
    assert_eq!(next.id, created.id + 1);
    assert_eq!(next.medical_record_no, "251212002");
}
