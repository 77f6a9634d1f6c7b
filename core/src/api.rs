//! Stable re-exports for consumers (`cli` and external crates).
//!
//! Prefer importing from `taskmux_core::api` instead of reaching into
//! internal modules.

pub use crate::backend::{
    decode_line, BackendDriver, BackendEvent, BackendKind, CliDriver, SdkDriver,
};
pub use crate::config::{
    get_data_dir, load_default, AppConfig, BackendProcessConfig, ControlConfig, EventsOutConfig,
    LoggingConfig, PersistenceConfig, ToolServerConfig,
};
pub use crate::coordinator::{ProcessCoordinator, SpawnArgs, TaskEvent, Worker, WorkerStatus};
pub use crate::detect::{
    detect_waiting_state, is_ready_for_initial_input, strip_control_sequences, WaitingState,
};
pub use crate::error::{CliError, CoordinatorError, GatewayError, PersistError, RegistryError};
pub use crate::events_out::{start_events_out, EventsOutTx, TaskEventRecord};
pub use crate::extract::{
    clean_output_from_markers, extract_code_files, extract_structured_result, CodeFile,
    FileOperation,
};
pub use crate::gateway::{
    GatewayNotice, PromptOutcome, SessionGateway, SessionHandle, SessionRecord, SessionStatus,
};
pub use crate::persist::{
    approx_decoded_size, ArchivedTaskMeta, HistoryRead, LoadReport, PersistedTask,
    PersistenceManager, RegistryDocument,
};
pub use crate::registry::{
    derive_project_name, NewTask, StateEvent, Task, TaskRegistry, TaskStatus,
};
pub use crate::util::ChunkRing;
