//! Per-aircraft approach detection.
//!
//! Each (user, aircraft) pair carries an [`ApproachState`] that consumes noisy
//! position samples and emits ordered, deduplicated threshold crossings. The
//! detector is pure over the state plus one sample, which keeps the timing
//! edge cases (silence window, go-around reset) testable without real time.

mod detector;
mod state;
mod store;

pub use detector::{Crossing, DetectorConfig, SampleResult, apply_sample};
pub use state::ApproachState;
pub use store::{ApproachStateStore, StateKey};
