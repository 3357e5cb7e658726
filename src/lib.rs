pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod pricing;
pub mod sweeper;
pub mod wal;
pub mod wire;
