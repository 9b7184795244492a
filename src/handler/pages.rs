//! View, edit and save handlers
//!
//! Each request is one transition on one page. Handlers only ever receive a
//! title that already passed validation.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Method, Response};

use super::router::{PageHandler, PageRequest};
use crate::config::AppState;
use crate::error::WikiError;
use crate::http;
use crate::logger;
use crate::page::{Action, Page, Title};
use crate::render::TemplateName;

const READ_METHODS: &str = "GET, HEAD";
const WRITE_METHODS: &str = "POST";

/// Show a page; a missing page redirects to its edit form
pub struct ViewHandler;

/// Show the edit form, empty when the page does not exist yet
pub struct EditHandler;

/// Store the submitted `body` field and redirect back to the page
pub struct SaveHandler;

pub fn handler_for(action: Action) -> &'static dyn PageHandler {
    match action {
        Action::View => &ViewHandler,
        Action::Edit => &EditHandler,
        Action::Save => &SaveHandler,
    }
}

impl PageHandler for ViewHandler {
    fn accepts(&self, method: &Method) -> bool {
        is_read_method(method)
    }

    fn allow(&self) -> &'static str {
        READ_METHODS
    }

    fn handle(&self, title: &Title, req: &PageRequest, state: &AppState) -> Response<Full<Bytes>> {
        match state.store.load(title) {
            Ok(page) => render_page(state, TemplateName::View, &page, req.is_head),
            Err(WikiError::NotFound(_)) => http::build_redirect_response(&page_url(Action::Edit, title)),
            Err(err) => error_response(&err),
        }
    }
}

impl PageHandler for EditHandler {
    fn accepts(&self, method: &Method) -> bool {
        is_read_method(method)
    }

    fn allow(&self) -> &'static str {
        READ_METHODS
    }

    fn handle(&self, title: &Title, req: &PageRequest, state: &AppState) -> Response<Full<Bytes>> {
        let page = match state.store.load(title) {
            Ok(page) => page,
            Err(WikiError::NotFound(_)) => Page::empty(title.clone()),
            Err(err) => return error_response(&err),
        };
        render_page(state, TemplateName::Edit, &page, req.is_head)
    }
}

impl PageHandler for SaveHandler {
    fn accepts(&self, method: &Method) -> bool {
        method == Method::POST
    }

    fn allow(&self) -> &'static str {
        WRITE_METHODS
    }

    fn handle(&self, title: &Title, req: &PageRequest, state: &AppState) -> Response<Full<Bytes>> {
        let body = req
            .form
            .as_ref()
            .map(|form| form.body.as_bytes().to_vec())
            .unwrap_or_default();
        let page = Page::new(title.clone(), body);

        match state.store.save(&page) {
            Ok(()) => {
                logger::log_debug(&format!(
                    "Saved page {title} ({} bytes) to {}",
                    page.body.len(),
                    state.store.path_for(title).display()
                ));
                http::build_redirect_response(&page_url(Action::View, title))
            }
            Err(err) => error_response(&err),
        }
    }
}

fn is_read_method(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

fn page_url(action: Action, title: &Title) -> String {
    format!("/{}/{title}", action.as_str())
}

/// Render fully before committing a status, so a template failure is a clean 500
fn render_page(
    state: &AppState,
    template: TemplateName,
    page: &Page,
    is_head: bool,
) -> Response<Full<Bytes>> {
    match state.renderer.render(template, page) {
        Ok(html) => http::build_html_response(html, is_head),
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &WikiError) -> Response<Full<Bytes>> {
    logger::log_error(&err.to_string());
    http::build_error_response(err.status(), &err.to_string())
}
