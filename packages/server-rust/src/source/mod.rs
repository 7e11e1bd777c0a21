//! Relational source access: the shared connection pool and the checkpoint
//! store that lives in the source database.

pub mod checkpoints;
pub mod pool;

pub use checkpoints::PgCheckpointStore;
pub use pool::SourcePool;
