pub mod coordinator;
pub mod types;

pub use coordinator::ProcessCoordinator;
pub use types::{SpawnArgs, TaskEvent, Worker, WorkerStatus};
