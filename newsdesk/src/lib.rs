// Library interface for newsdesk modules
// This allows tests and the binary to import modules

pub mod agent;
pub mod delivery;
pub mod error;
pub mod history;
pub mod ingestion;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod render;
pub mod scraping;
pub mod search;
