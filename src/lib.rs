pub mod cli;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod host;
pub mod link;
pub mod liveness;
pub mod proto;
pub mod stats;
pub mod telemetry;
