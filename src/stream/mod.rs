//! Stream adapters for observer taps.
//!
//! Observer streams (session states, snapshot mirrors) are read-side taps
//! that must never apply backpressure to the tick loop. The throttle
//! combinator bounds their emission rate with latest-wins semantics so a
//! slow observer sees fewer, fresher items instead of a growing backlog.

mod throttle;

pub use throttle::{Throttle, ThrottleExt};
