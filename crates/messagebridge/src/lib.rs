pub mod app;
pub mod config;
pub mod llm;
pub mod parse;
pub mod telemetry;
