use std::fs::{self, File};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::mapping::FileMapping;
use crate::response::{ContentType, ResponseCode, ServedFile};

const WORLD_READABLE: u32 = 0o004;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    pub index_file: String,
    pub page_path: String,
    pub page_file: String,
    pub random_path: String,
    pub resource_dir: String,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            index_file: "index.html".to_string(),
            page_path: "/funny_box.html".to_string(),
            page_file: "funny_box.html".to_string(),
            random_path: "/random_funny".to_string(),
            resource_dir: "funny_mystery_box".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Index,
    Page,
    Random,
    Unknown,
}

impl RouteTable {
    pub fn resolve(&self, target: &[u8]) -> Route {
        if target == b"/" {
            Route::Index
        } else if target == self.page_path.as_bytes() {
            Route::Page
        } else if target == self.random_path.as_bytes() {
            Route::Random
        } else {
            Route::Unknown
        }
    }
}

// Servable resource names, gathered once at startup and never mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct ResourceCatalog {
    names: Arc<[String]>,
}

impl ResourceCatalog {
    pub fn new(mut names: Vec<String>) -> Self {
        names.sort();
        Self {
            names: names.into(),
        }
    }

    // Intent: collect the regular files of the resource directory.
    // Result: a sorted snapshot; subdirectories and special files are skipped.
    pub fn scan(dir: &Path) -> io::Result<Self> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => debug!(?name, "skipping non UTF-8 resource name"),
            }
        }
        Ok(Self::new(names))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn pick(&self) -> Option<&str> {
        if self.names.is_empty() {
            return None;
        }
        Some(self.names[fastrand::usize(..self.names.len())].as_str())
    }
}

// Everything a worker needs to answer a request: server root, routes and catalog.
#[derive(Debug, Clone)]
pub struct Site {
    root: PathBuf,
    routes: RouteTable,
    catalog: ResourceCatalog,
}

impl Site {
    pub fn new(root: impl Into<PathBuf>, routes: RouteTable, catalog: ResourceCatalog) -> Self {
        Self {
            root: root.into(),
            routes,
            catalog,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn catalog(&self) -> &ResourceCatalog {
        &self.catalog
    }

    // Intent: map a request target onto one of the fixed routes.
    // Result: the prepared file, or the response code explaining why there is none.
    pub fn serve(&self, target: &[u8]) -> Result<ServedFile, ResponseCode> {
        match self.routes.resolve(target) {
            Route::Index => {
                self.prepare_file(Path::new(&self.routes.index_file), Some(ContentType::Html))
            }
            Route::Page => {
                self.prepare_file(Path::new(&self.routes.page_file), Some(ContentType::Html))
            }
            Route::Random => {
                let name = self.catalog.pick().ok_or(ResponseCode::NoResource)?;
                let path = Path::new(&self.routes.resource_dir).join(name);
                self.prepare_file(&path, ContentType::from_file_name(name))
            }
            Route::Unknown => Err(ResponseCode::NoResource),
        }
    }

    // Intent: check and map a file below the server root.
    // Result: NoResource when missing, Forbidden without world-read permission, BadRequest
    // for directories, otherwise the mapped file.
    pub fn prepare_file(
        &self,
        relative: &Path,
        content_type: Option<ContentType>,
    ) -> Result<ServedFile, ResponseCode> {
        let path = self.root.join(relative);
        let metadata = fs::metadata(&path).map_err(|_| ResponseCode::NoResource)?;
        if metadata.permissions().mode() & WORLD_READABLE == 0 {
            return Err(ResponseCode::Forbidden);
        }
        if metadata.is_dir() {
            return Err(ResponseCode::BadRequest);
        }

        let size = usize::try_from(metadata.len()).map_err(|_| ResponseCode::InternalError)?;
        if size == 0 {
            return Ok(ServedFile {
                content_type,
                size,
                mapping: None,
            });
        }

        let file = File::open(&path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => ResponseCode::NoResource,
            io::ErrorKind::PermissionDenied => ResponseCode::Forbidden,
            _ => ResponseCode::InternalError,
        })?;
        let mapping = FileMapping::map(&file, size).map_err(|err| {
            debug!(path = %path.display(), error = %err, "mmap failed");
            ResponseCode::InternalError
        })?;
        Ok(ServedFile {
            content_type,
            size,
            mapping: Some(mapping),
        })
    }
}
