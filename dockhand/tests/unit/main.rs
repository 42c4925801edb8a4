//! Integration tests for dockhand

mod common;
mod test_compose;
mod test_lifecycle;
mod test_server;
mod test_worker;
