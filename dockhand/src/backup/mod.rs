pub mod archive;
pub mod manager;
