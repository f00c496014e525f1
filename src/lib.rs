pub mod analyzers;
pub mod config;
pub mod error;
pub mod filters;
pub mod loader;
pub mod output;
pub mod pipeline;
pub mod sample;
