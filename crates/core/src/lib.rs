pub mod cursor;
pub mod history;
pub mod message;
pub mod model;
pub mod status;
pub mod tree;

pub use cursor::{DivergenceReason, FetchMode, SyncCursor};
pub use history::{DiffReport, HistoryState};
pub use model::*;
pub use status::{BusyNotice, BusyState, MutationKind, StatusGate, StatusIndicator};
pub use tree::{ParentResolver, TreeBuilder};

#[cfg(any(test, feature = "testing"))]
pub mod testing;
