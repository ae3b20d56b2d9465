//! Time-ordered row identifiers.
//!
//! Ids are UUIDv7: the unix timestamp in milliseconds fills the high 48 bits,
//! followed by the version nibble, random bits from the OS generator and the
//! RFC 4122 variant. The lowercase hyphenated rendering therefore sorts by
//! creation time across distinct milliseconds.

use uuid::Uuid;

/// Function names that evaluate to a fresh id when called with no arguments,
/// e.g. `DEFAULT gen_random_uuid()`.
pub const ID_FUNCTIONS: &[&str] = &["gen_random_uuid", "uuid_generate_v7", "uuidv7", "gen_id"];

pub fn generate_id() -> String {
    Uuid::now_v7().hyphenated().to_string()
}

/// Returns true if `name` (case-insensitive) is a recognised id generator.
pub fn is_id_function(name: &str) -> bool {
    ID_FUNCTIONS.iter().any(|f| f.eq_ignore_ascii_case(name))
}

/// Millisecond timestamp embedded in an id produced by [`generate_id`].
pub fn id_timestamp_millis(id: &str) -> Option<u64> {
    let uuid = Uuid::parse_str(id).ok()?;
    let bytes = uuid.as_bytes();
    let mut ms = 0u64;
    for b in &bytes[..6] {
        ms = (ms << 8) | u64::from(*b);
    }
    Some(ms)
}
