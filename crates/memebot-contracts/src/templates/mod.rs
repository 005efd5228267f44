mod record;
mod registry;
mod snapshot;

pub use record::{validate_name, TemplateRecord, RESERVED_NAMES};
pub use registry::TemplateRegistry;
pub use snapshot::SnapshotStore;
