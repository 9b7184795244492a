//! Page model
//!
//! A page is a title plus raw body bytes. Pages live only for the duration
//! of one request; the store owns the durable copy.

pub mod title;

use std::borrow::Cow;

pub use title::{Action, Title, TitleValidator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub title: Title,
    pub body: Vec<u8>,
}

impl Page {
    pub fn new(title: Title, body: impl Into<Vec<u8>>) -> Self {
        Self {
            title,
            body: body.into(),
        }
    }

    /// A page that has never been saved
    pub const fn empty(title: Title) -> Self {
        Self {
            title,
            body: Vec::new(),
        }
    }

    /// Body as text for templates; invalid UTF-8 is replaced
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}
