pub mod config;
pub mod error;
pub mod features;
pub mod logging;
pub mod services;
pub mod session;
pub mod utils;
