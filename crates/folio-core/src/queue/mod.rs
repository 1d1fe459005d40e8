//! Queue module: job status, records, retry policy, and the job stores.

mod file;
mod memory;
mod record;
mod retry;
mod state;
mod table;

pub use file::FileJobStore;
pub(crate) use file::write_json_atomic;
pub use memory::{DEFAULT_DEDUP_WINDOW, InMemoryJobStore};
pub use record::{JobRecord, JobView, Lease, NewJob};
pub use retry::RetryPolicy;
pub use state::JobStatus;
pub use table::{IdempotencyEntry, JobTable, TableSnapshot};
