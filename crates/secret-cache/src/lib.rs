//! Time-bounded secret store for one-time challenges
//!
//! Maps an opaque secret to an associated value (for the bridge, the path of
//! the file the secret was written to). Entries expire at an absolute instant
//! and every entry leaves the cache exactly once, as an `Eviction` record:
//!
//! 1. `take` wins: the caller gets the value, the record is `Consumed`
//! 2. the expiry sweep wins: the caller sees "absent", the record is `Expired`
//! 3. shutdown drains whatever is left as `Shutdown`
//!
//! Records are handed to a cleanup handler by the background sweeper after the
//! cache lock has been released.

pub mod cache;
pub mod clock;
pub mod sweeper;

pub use cache::{Eviction, EvictionReason, SecretCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use sweeper::spawn_sweep_task;
