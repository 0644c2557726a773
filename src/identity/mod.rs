//! Deterministic lecture identities.
//!
//! The key covers name, day and start only. Room, group and docents are left
//! out because those are the fields that accumulate across observations.

use chrono::NaiveDateTime;

use crate::models::LectureId;

/// Size of the key in bytes; matches the 12-byte document ids of the store the
/// timetable was first mirrored into.
pub const ID_BYTES: usize = 12;

pub fn derive(name: &str, day_label: &str, start: NaiveDateTime) -> LectureId {
    let start = start.format("%Y-%m-%dT%H:%M:%S").to_string();
    let mut hasher = blake3::Hasher::new();
    // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
    for part in [name, day_label, start.as_str()] {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let hash = hasher.finalize();

    LectureId::from_hex(hash.to_hex()[..ID_BYTES * 2].to_string())
}
