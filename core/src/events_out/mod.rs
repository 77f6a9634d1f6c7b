pub mod writer;

pub use writer::{start_events_out, EventsOutTx, TaskEventRecord};
