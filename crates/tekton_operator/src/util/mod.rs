pub mod errors;
pub mod hash;
pub mod metrics;
pub mod telemetry;
