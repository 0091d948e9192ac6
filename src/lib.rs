pub mod acl;
pub mod config;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod security;
pub mod storage;
pub mod types;

pub use config::Config;
pub use error::{NsPlaneError, Result};
