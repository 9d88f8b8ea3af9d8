//! Byte store capability

use crate::Result;

/// A key/value byte store backing one cache tier
///
/// Implementations are synchronous; a lookup blocks for the duration of the
/// store operation.
pub trait CacheInterface: Send + Sync + std::fmt::Debug {
    /// Stored bytes for `key`
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value
    fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove `key`; removing a missing key is not an error
    fn delete(&self, key: &str) -> Result<()>;

    /// Name used for logging and statistics
    fn name(&self) -> &str;
}
