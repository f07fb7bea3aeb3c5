pub mod cancel;
pub mod chunker;
mod execute;
pub mod runner;
pub mod spool;

pub use cancel::CancelToken;
pub use chunker::chunk_text;
pub use execute::Outcome;
pub use runner::{Worker, WorkerSettings};
pub use spool::JobSpool;
