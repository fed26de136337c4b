//! Core types shared by collectors, the run store and the diff engine.

pub mod codec;
pub mod collector;
pub mod filter;
pub mod model;
pub mod platform;

pub use collector::{CollectContext, Collector, EmitStats, Emitter, RecordSink};
pub use filter::{Filter, Operation};
pub use model::*;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
