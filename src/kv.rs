use anyhow::Result;

/// String key-value storage backing the job ledger.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write every entry, or none of them.
    fn put_all(&mut self, entries: &[(String, String)]) -> Result<()>;
}
