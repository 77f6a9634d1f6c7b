pub mod history;
pub mod manager;
pub mod types;

pub use history::{approx_decoded_size, HistoryRead};
pub use manager::{LoadReport, PersistenceManager};
pub use types::{ArchivedTaskMeta, PersistedTask, RegistryDocument};
