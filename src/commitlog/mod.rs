mod in_memory;
mod log;
mod record;
mod storage;

pub use in_memory::InMemoryLog;
pub use log::Log;
pub use log::LogCursor;
pub use log::LogRecord;
pub use log::TxId;
pub use storage::SegmentedDiskLog;
pub use storage::StorageConfig;
