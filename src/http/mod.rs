//! HTTP API module for the entity store
//!
//! Exposes datasets, entity listings, change feeds and graph reads over REST.

pub mod server;

pub use server::{
    create_server, create_server_with_page_size, start_server, ApiError, AppState,
    CreateDatasetRequest, DatasetResponse, ErrorResponse, InfoResponse, IngestResponse,
    ServerConfig, SuccessResponse, DEFAULT_PAGE_SIZE,
};
