//! Core domain types shared by the runtime and coordinators.

mod status;

pub use status::{Priority, TaskStatus};
