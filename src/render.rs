//! Template rendering
//!
//! Both page templates are compiled once at startup. Rendering produces the
//! complete document in memory, so a template failure is always reported
//! before any status line is written. Template names end in `.html`, which
//! turns on HTML auto-escaping for every interpolated value.

use std::fs;
use std::path::Path;

use minijinja::{context, Environment};

use crate::error::WikiError;
use crate::page::Page;

const BUILTIN_VIEW: &str = include_str!("../templates/view.html");
const BUILTIN_EDIT: &str = include_str!("../templates/edit.html");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateName {
    View,
    Edit,
}

impl TemplateName {
    pub const ALL: [Self; 2] = [Self::View, Self::Edit];

    pub const fn file_name(self) -> &'static str {
        match self {
            Self::View => "view.html",
            Self::Edit => "edit.html",
        }
    }

    const fn builtin_source(self) -> &'static str {
        match self {
            Self::View => BUILTIN_VIEW,
            Self::Edit => BUILTIN_EDIT,
        }
    }
}

pub struct Renderer {
    env: Environment<'static>,
}

impl Renderer {
    /// Load templates from `dir` unless the built-in ones are requested
    pub fn new(dir: &Path, builtin: bool) -> Result<Self, WikiError> {
        if builtin {
            Self::builtin()
        } else {
            Self::from_dir(dir)
        }
    }

    pub fn builtin() -> Result<Self, WikiError> {
        let mut env = Environment::new();
        for name in TemplateName::ALL {
            env.add_template(name.file_name(), name.builtin_source())?;
        }
        Ok(Self { env })
    }

    /// Every template must exist in `dir`; a missing one fails startup
    pub fn from_dir(dir: &Path) -> Result<Self, WikiError> {
        let mut env = Environment::new();
        for name in TemplateName::ALL {
            let path = dir.join(name.file_name());
            let source = fs::read_to_string(&path)
                .map_err(|source| WikiError::TemplateLoad { path, source })?;
            env.add_template_owned(name.file_name(), source)?;
        }
        Ok(Self { env })
    }

    pub fn render(&self, name: TemplateName, page: &Page) -> Result<String, WikiError> {
        let template = self.env.get_template(name.file_name())?;
        let html = template.render(context! {
            title => page.title.as_str(),
            body => page.body_text().into_owned(),
        })?;
        Ok(html)
    }
}
