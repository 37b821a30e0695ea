//! Job bookkeeping: records, dispatch queue and results
//!
//! All three share one [`KvStore`](crate::store::KvStore) and own disjoint key
//! prefixes (see [`keys`]).

pub mod dispatch;
pub mod error;
pub mod keys;
pub mod models;
pub mod registry;
pub mod results;

pub use dispatch::DispatchQueue;
pub use error::JobError;
pub use models::{JobRecord, JobStatus, ResultRecord};
pub use registry::JobRegistry;
pub use results::ResultStore;
