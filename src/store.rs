//! Page store
//!
//! Maps each title to `{data_dir}/{title}.txt`. Saves go through a temp file
//! in the same directory followed by a rename, so a concurrent load sees
//! either the previous body or the new one, never a partial write.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::WikiError;
use crate::page::{Page, Title};

const PAGE_EXTENSION: &str = "txt";

#[derive(Debug, Clone)]
pub struct PageStore {
    data_dir: PathBuf,
}

impl PageStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Create the data directory if needed and return a store rooted there
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, WikiError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).map_err(|source| WikiError::Storage {
            path: data_dir.clone(),
            source,
        })?;
        Ok(Self::new(data_dir))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path_for(&self, title: &Title) -> PathBuf {
        self.data_dir.join(format!("{title}.{PAGE_EXTENSION}"))
    }

    /// Read the page stored under `title`
    ///
    /// A missing file is [`WikiError::NotFound`]; every other I/O failure is
    /// [`WikiError::Storage`].
    pub fn load(&self, title: &Title) -> Result<Page, WikiError> {
        let path = self.path_for(title);
        match fs::read(&path) {
            Ok(body) => Ok(Page::new(title.clone(), body)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(WikiError::NotFound(title.to_string()))
            }
            Err(source) => Err(WikiError::Storage { path, source }),
        }
    }

    /// Write the page body verbatim, replacing any previous content
    pub fn save(&self, page: &Page) -> Result<(), WikiError> {
        let path = self.path_for(&page.title);
        let storage = |source: io::Error| WikiError::Storage {
            path: path.clone(),
            source,
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(&self.data_dir)
            .map_err(storage)?;
        tmp.write_all(&page.body).map_err(storage)?;
        tmp.as_file().sync_all().map_err(storage)?;
        restrict_to_owner(tmp.as_file()).map_err(storage)?;
        tmp.persist(&path).map_err(|e| storage(e.error))?;

        Ok(())
    }
}

#[cfg(unix)]
fn restrict_to_owner(file: &fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_file: &fs::File) -> io::Result<()> {
    Ok(())
}
