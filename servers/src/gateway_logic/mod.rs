pub mod config;
pub mod downstream;
pub mod listener;
pub mod logger;
pub mod model;
pub mod session;
pub mod state;
