//! Streaming ingestion of JSON entity arrays

pub mod entity_handler;
pub mod json_events;
pub mod normalizer;
