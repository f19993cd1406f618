//! Observability utilities: span timing, task attributes and log setup.

mod logging;
mod spans;

pub use logging::init_logging;
pub use spans::{SpanTimer, TaskSpanAttributes};
