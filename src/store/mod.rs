/// Persistence bootstrap
///
/// Owns the SQLite pool shared by process storage, the lease queue and the
/// subscriber registry.

pub mod database;

pub use database::Database;

/// Current UTC time in RFC 3339, the format every TEXT timestamp column uses
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
