pub mod chain;
pub mod dynamic;
pub mod merge;
