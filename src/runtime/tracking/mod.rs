pub mod handle_table;
pub mod tracking_handle;

pub use handle_table::{HandleTable, Tracked};
pub use tracking_handle::{ExtensionHandle, RawHandle, TrackingHandle, WrapperHandle};
