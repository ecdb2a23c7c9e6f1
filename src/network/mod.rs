pub mod error;
pub mod medium;
pub mod rate_limiter;
pub mod transport;

pub use error::{NetworkError, NetworkResult};
pub use medium::{Link, MediumPort, MediumStats, SimulatedMedium};
pub use rate_limiter::AirtimeLimiter;
pub use transport::{InboundFrame, RecordingTransport, Transport};
