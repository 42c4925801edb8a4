pub mod consumer;
pub mod scheduler;
