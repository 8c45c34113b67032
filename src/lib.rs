//! downwind - landing-approach alert service
//!
//! Polls an ADS-B position feed for user-tracked aircraft and fires one
//! webhook notification per distance threshold per approach episode as an
//! aircraft descends toward a configured airport.

pub mod approach;
pub mod config;
pub mod dispatcher;
pub mod geo;
pub mod model;
pub mod persistence;
pub mod position_source;
pub mod registry;
pub mod scheduler;

pub use model::{AlertEvent, PositionReport, TransponderId};
pub use scheduler::{Scheduler, SchedulerConfig, TickSummary};
