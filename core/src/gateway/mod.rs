pub mod delta;
pub mod pending;
pub mod service;
pub mod session;

pub use delta::DeltaTracker;
pub use service::{GatewayNotice, SessionGateway};
pub use session::{PromptOutcome, SessionHandle, SessionRecord, SessionStatus};
