//! A versioned document store with an HTTP API
//!
//! Collections hold numbered archives, archives hold documents under string keys, and every
//! write to a document appends an immutable revision to its history.

#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod error;
pub mod http;
pub mod ledger;
pub mod model;
pub mod registry;
pub mod server;
pub mod service;
pub mod state;
pub mod store;
mod util;

pub use error::{Error, Result};
pub use service::{CallContext, Service};
