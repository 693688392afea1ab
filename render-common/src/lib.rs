pub mod broker;
pub mod harness;
pub mod job;
pub mod jobqueue;
pub mod metadata;
pub mod metrics;
