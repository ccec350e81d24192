//! Time-prefixed version identifiers
//!
//! A version id has the form `YYYYMMDD-SSSSS-XXXXX`: the UTC calendar date,
//! the zero-padded second of that day, and five characters drawn uniformly
//! from a 31-letter alphabet with the ambiguous glyphs removed. Ids sort
//! lexicographically in chronological order, with the random suffix as a
//! stable tie-breaker, and the prefix parses back to the creation instant
//! at second precision.
//!
//! The suffix gives roughly a 1-in-31^5 chance of collision for two ids
//! minted in the same second; callers retry when a store reports the id as
//! already taken.

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use rand::Rng;
use std::fmt;
use std::time::SystemTime;

/// Suffix alphabet: digits and lowercase letters minus 0, 1, i, l, and o
pub const ALPHABET: &[u8] = b"23456789abcdefghjkmnpqrstuvwxyz";

/// Length of the random suffix
pub const SUFFIX_LENGTH: usize = 5;

/// Error produced when an id string does not match the expected form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseVersionIdError(pub String);

impl fmt::Display for ParseVersionIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid version id: {}", self.0)
    }
}

impl std::error::Error for ParseVersionIdError {}

/// Mint a new id for the current instant
pub fn generate() -> String {
    generate_at(Utc::now())
}

/// Mint an id embedding the given instant
pub fn generate_at(instant: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LENGTH)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!(
        "{}-{:05}-{}",
        instant.format("%Y%m%d"),
        instant.num_seconds_from_midnight(),
        suffix
    )
}

/// Parse the time prefix of an id, recovering the creation instant to
/// second precision
pub fn parse(id: &str) -> Result<SystemTime, ParseVersionIdError> {
    let bad = || ParseVersionIdError(id.to_string());

    let mut parts = id.split('-');
    let (date, secs, suffix) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(d), Some(s), Some(x), None) => (d, s, x),
        _ => return Err(bad()),
    };
    if date.len() != 8 || secs.len() != 5 || suffix.len() != SUFFIX_LENGTH {
        return Err(bad());
    }
    if !suffix.bytes().all(|b| ALPHABET.contains(&b)) {
        return Err(bad());
    }

    let date = NaiveDate::parse_from_str(date, "%Y%m%d").map_err(|_| bad())?;
    let second_of_day: i64 = secs.parse().map_err(|_| bad())?;
    if second_of_day >= 86_400 {
        return Err(bad());
    }

    let midnight = date.and_hms_opt(0, 0, 0).expect("midnight is valid");
    let instant = (midnight + Duration::seconds(second_of_day)).and_utc();
    Ok(instant.into())
}

/// Check whether a string is a well-formed version id
pub fn is_valid(id: &str) -> bool {
    parse(id).is_ok()
}
