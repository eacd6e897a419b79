use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt fingerprint for task {task_id}: {len} bytes")]
    CorruptFingerprint { task_id: String, len: usize },
}
