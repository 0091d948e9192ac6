pub mod file;
pub mod log_store;
pub mod memory;
pub mod traits;

pub use file::FileResourceLog;
pub use log_store::{LogBackedStore, StoreStatus};
pub use memory::InMemoryResourceLog;
pub use traits::*;
