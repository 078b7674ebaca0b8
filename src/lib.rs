//! Import product reviews and ratings exported as CSV from one catalog into
//! another, optionally remapping product ids on the way.

pub mod config;
pub mod error;
pub mod join;
pub mod logging;
pub mod model;
pub mod parse;
pub mod pipeline;
pub mod store;

pub use error::{ImportError, MalformedInput};
pub use model::ImportResult;
pub use pipeline::{ImportPipeline, RowErrorPolicy};
