pub mod batch;
pub mod config;
pub mod pipeline;
pub mod prometheus;
pub mod record;
pub mod ride;
pub mod sinks;
pub mod source;
