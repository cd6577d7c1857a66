//! Alarms for the walnut voice assistant
//!
//! Persistence in a small SQLite file, a one-second scheduler tick that
//! claims due alarms atomically, a natural-language time parser for
//! spoken requests, and cheerword generation for themed wake-ups.

pub mod cheerword;
pub mod scheduler;
pub mod store;
pub mod time_parser;

pub use cheerword::CheerwordGenerator;
pub use scheduler::AlarmScheduler;
pub use store::{Alarm, AlarmStore};
pub use time_parser::parse_spoken_time;
