//! Process-level infrastructure shared by the `pulse` binary: configuration
//! loading and logger setup.

pub mod config;
pub mod logging;
