pub mod app;
pub mod clock;
pub mod config;
pub mod context;
pub mod controller;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod loader;
pub mod logging;
pub mod orchestrator;
pub mod render;
pub mod transport;
pub mod view;
