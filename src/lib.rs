pub mod app;
pub mod audio;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod favorites;
pub mod history;
pub mod logging;
pub mod model;
pub mod pipeline;
