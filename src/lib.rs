pub mod adbd;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod device;
pub mod error;

pub use error::{Error, Result};
