//! Invoice ingestion backend: turns uploaded vendor invoices into runs with
//! computed totals, and drafts vendor bills in Zoho Books from them.

pub mod bills;
pub mod blobs;
pub mod config;
pub mod error;
pub mod ids;
pub mod ingest;
pub mod model;
pub mod normalize;
pub mod oauth;
pub mod parser_client;
pub mod service;
pub mod simulator;
pub mod store;
pub mod totals;

pub use error::{Error, Result};
