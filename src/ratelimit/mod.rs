//! Rate limiting logic and state management.

mod client;
mod clock;
mod counter;
mod limiter;
mod sweeper;

pub use client::{ClientKey, ForwardedPolicy, X_FORWARDED_FOR};
pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::RequestCounter;
pub use limiter::{Admission, AdmissionStatus, LimitConfig, RateLimiter};
pub use sweeper::{Sweeper, SweeperHandle};
