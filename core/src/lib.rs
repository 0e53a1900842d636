pub mod calibrate;
pub mod classify;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod log;
pub mod metrics;
pub mod normalize;
pub mod pipeline;
pub mod privacy;
pub mod repair;
pub mod rhythm;
pub mod router;
pub mod scenario;
pub mod signing;
pub mod tone;
pub mod usage;
