//! Target Queue

mod queue;

pub use queue::TargetQueue;
