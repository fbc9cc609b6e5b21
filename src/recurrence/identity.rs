// file: src/recurrence/identity.rs
use chrono::{Datelike, NaiveDate};
use uuid::Uuid;

/// Stable id for the occurrence of `master_id` on `occurrence_date`.
///
/// The first 16 bytes of a BLAKE3 digest over `"{master}-{y}-{m}-{d}"`. The
/// same pair always maps to the same id, across runs and machines.
pub fn virtual_id(master_id: Uuid, occurrence_date: NaiveDate) -> Uuid {
    let seed = format!(
        "{}-{}-{}-{}",
        master_id,
        occurrence_date.year(),
        occurrence_date.month(),
        occurrence_date.day()
    );
    let digest = blake3::hash(seed.as_bytes());

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest.as_bytes()[..16]);
    Uuid::from_bytes(bytes)
}
