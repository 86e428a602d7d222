//! Shared data model for the ovpn-helper daemon.
//!
//! This crate holds the types that cross the boundary between the profile
//! supervisor, the event bus, and the control API: the wire-visible
//! `Profile` view, `Event`, `Token` and the `AuthData` credential envelope.

pub mod error;
pub mod event;
pub mod profile;
pub mod token;

pub use error::{Error, Result};
pub use event::{Event, EventType, OutputData};
pub use profile::{Profile, Status};
pub use token::{AuthData, Token};

lazy_static::lazy_static! {
    /// Strips every byte that is not `[A-Za-z0-9_-]` from a profile id.
    static ref ID_FILTER: regex::Regex = regex::Regex::new(r"[^A-Za-z0-9_-]+").unwrap();
}

/// Filters a raw profile id down to the characters the supervisor will
/// accept as part of a filesystem path component.
pub fn filter_id(raw: &str) -> String {
    ID_FILTER.replace_all(raw, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_id_strips_unsafe_chars() {
        assert_eq!(filter_id("abc-123_XYZ"), "abc-123_XYZ");
        assert_eq!(filter_id("a/b c;d"), "abcd");
        assert_eq!(filter_id(""), "");
    }
}
