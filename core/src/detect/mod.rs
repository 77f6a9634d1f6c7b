pub mod state;
pub mod strip;

pub use state::{detect_waiting_state, is_ready_for_initial_input, WaitingState};
pub use strip::strip_control_sequences;
