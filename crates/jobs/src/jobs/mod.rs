pub mod collect;
pub mod trigger;
pub mod wait;

pub use collect::{collect, decode_report};
pub use trigger::{trigger, trigger_with_retry};
pub use wait::wait;
