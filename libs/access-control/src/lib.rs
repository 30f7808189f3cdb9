pub mod access;
pub mod cache;
pub mod clock;
pub mod memory;
pub mod metrics;
pub mod optimizer;
pub mod pg;
pub mod registry;
pub mod resolver;
pub mod store;
