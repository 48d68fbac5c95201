//! # Resilience
//!
//! Timeout, retry with exponential backoff and jitter, and a shared circuit
//! breaker for asynchronous operations.
//!
//! ```no_run
//! use resilience::{Error, ErrorKind, ResilienceConfig, ResiliencePolicy};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = ResiliencePolicy::new(ResilienceConfig::default())?;
//! let value = policy
//!     .execute(
//!         |_attempt| async { Ok::<_, Error>(42) },
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//! assert_eq!(value, 42);
//! # let _ = ErrorKind::Timeout;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod pipeline;
pub mod policy;
pub mod retry;
pub mod types;

pub use circuit_breaker::{CircuitBreaker, CircuitSnapshot, CircuitState, Permit};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ResilienceConfig};
pub use pipeline::{BoxedCall, Pipeline, Stage};
pub use policy::{Failure, ResilienceError, ResiliencePolicy};
pub use retry::Backoff;
pub use types::{Error, ErrorKind, Result};
