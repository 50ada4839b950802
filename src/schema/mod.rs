//! pulse.raw_stream.v1 input schema
//!
//! Source types, raw batches and the timestamp/field helpers shared by the
//! validator and the provider fetchers.

mod raw_event;

pub use raw_event::*;
