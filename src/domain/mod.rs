pub mod clock;
pub mod entities;
pub mod errors;
pub mod formatting;
pub mod ports;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entities::*;
pub use errors::{DomainError, ResilienceError, Result, Retryable};
