pub mod api;
pub mod app;
pub mod collection;
pub mod config;
pub mod error;
pub mod location;
pub mod logging;
pub mod openapi;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod trigger;
