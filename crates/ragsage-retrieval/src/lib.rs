//! Retrieval of organizational content from the Microsoft 365 Copilot
//! retrieval API.
//!
//! [`RetrievalClient::search`] fails soft: anything short of an
//! authentication failure or cancellation yields a (possibly empty) list of
//! [`RetrievedContent`](ragsage_core::RetrievedContent) records.

pub mod client;
pub mod error;
pub mod query;

pub use client::{RetrievalClient, SearchOutcome};
pub use error::RetrievalError;
pub use query::{RetrievalQuery, DATASOURCE_SHAREPOINT, RESOURCE_METADATA, SOURCE_LABEL, UNKNOWN_TITLE};
