pub mod domain;
pub mod postgres;
pub mod telemetry;

pub use domain::*;
pub use postgres::*;
pub use telemetry::*;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockReadingSink;
