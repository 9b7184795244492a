//! HTTP protocol layer module
//!
//! Response builders shared by the router and the page handlers.

pub mod response;

pub use response::{
    build_404_response, build_405_response, build_413_response, build_error_response,
    build_html_response, build_redirect_response,
};
