pub mod registry;
pub mod task;
pub mod transitions;

pub use registry::{NewTask, StateEvent, TaskRegistry};
pub use task::{derive_project_name, Task, TaskStatus};
pub use transitions::{StatusTransition, TransitionError};
