//! Identifiers, timestamps and hashing helpers.

pub mod hashing;
pub mod ids;
pub mod timestamps;

pub use hashing::{sha256_hex, Sha256Builder};
pub use ids::{generate_uuid, RunIdGenerator};
pub use timestamps::{duration_between, iso_timestamp, parse_timestamp, Timestamp};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uuid_is_valid() {
        let id = generate_uuid();
        assert_eq!(id.get_version_num(), 4);
    }

    #[test]
    fn test_iso_timestamp_round_trips() {
        let ts = iso_timestamp();
        assert!(ts.contains('T'));
        assert!(parse_timestamp(&ts).is_ok());
    }
}
