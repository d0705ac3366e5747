pub mod config;
pub mod controller;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod external;
pub mod io;
pub mod manifest;
pub mod mask;
pub mod naming;
pub mod paths;
pub mod portable;
pub mod provider;
pub mod store;
pub mod types;

pub use error::{Result, SnowUtilsError};
