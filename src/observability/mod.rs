// Structured logging
pub mod logging;

// Cache counters
pub mod metrics;

pub use logging::init_logging;
