pub mod google_drive;
pub mod limiter;
pub mod memory_queue;
pub mod pipeline;
pub mod provider;
pub mod queue;
pub mod reconcile;
pub mod status;
pub mod storage;
pub mod submission;
pub mod worker;
