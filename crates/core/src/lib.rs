#![forbid(unsafe_code)]

pub mod error;
pub mod mirror;
pub mod model;
pub mod progress;
pub mod reconcile;
pub mod scheduler;
pub mod time;
pub mod unlock;

pub use error::Error;
pub use time::Clock;
