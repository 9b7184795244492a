//! Request handler module
//!
//! Route dispatch plus the three page operations: view, edit and save.

pub mod pages;
pub mod router;

// Re-export main entry point
pub use router::handle_request;
