#![deny(
    clippy::all,
    clippy::missing_const_for_fn,
    clippy::pedantic,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links,
    unsafe_code,
    unused
)]
#![doc = include_str!("../README.md")]
#![allow(
    clippy::module_name_repetitions,
    clippy::semicolon_if_nothing_returned,
    clippy::unnecessary_wraps
)]

mod bucket;
mod clock;
pub mod limiter;
pub mod log;
mod minute;
pub mod monitor;
mod ticket;
mod waiter;
pub mod wrapper;

pub use bucket::SecondBucket;
pub use limiter::Limiter;
pub use log::{load_session, replay_latest, trim_trailing_inactive_seconds, ReplayError};
pub use minute::{MinuteBucket, RampParameters};
pub use monitor::{Listener, Monitor};
pub use ticket::{RateLimitEvent, Ticket};
pub use wrapper::{with_admission_control, with_admission_control_by, UpstreamOutcome};
