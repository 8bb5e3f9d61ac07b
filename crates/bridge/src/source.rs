//! Script source resolution.
//!
//! A script arrives either as a file name inside an allow-listed directory or
//! as an inline base64 payload. Every check runs before a single byte of the
//! script is read.

use std::{
    io,
    path::{Component, Path, PathBuf},
};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

/// Extension every script file must carry.
pub const SCRIPT_EXTENSION: &str = ".rhai";

/// Directories, relative to the working directory, scripts may be loaded from.
pub const DEFAULT_ALLOWED_DIRS: &[&str] = &["scripts", "src/main/resources", "src/test/resources"];

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid script name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("script directory {} is not in the allow-list", .dir.display())]
    DirectoryNotAllowed { dir: PathBuf },
    #[error("script {} escapes its directory", .path.display())]
    Escapes { path: PathBuf },
    #[error("script {} does not exist", .path.display())]
    NotFound { path: PathBuf },
    #[error("script {} is not a regular file", .path.display())]
    NotAFile { path: PathBuf },
    #[error("failed to read script {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("script {} is not valid UTF-8", .path.display())]
    FileUtf8 { path: PathBuf },
    #[error("inline script payload is empty")]
    EmptyPayload,
    #[error("inline script payload is not valid base64")]
    Base64(#[from] base64::DecodeError),
    #[error("inline script payload is not valid UTF-8")]
    InlineUtf8(#[from] std::string::FromUtf8Error),
    #[error("failed to resolve the working directory")]
    WorkingDir(#[source] io::Error),
}

/// Where the script text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    File { name: String, dir: PathBuf },
    Inline { encoded: String },
}

impl ScriptSource {
    pub fn file(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self::File {
            name: name.into(),
            dir: dir.into(),
        }
    }

    pub fn inline(encoded: impl Into<String>) -> Self {
        Self::Inline {
            encoded: encoded.into(),
        }
    }

    /// Resolve the script text.
    ///
    /// # Errors
    /// Returns error if validation, reading, or decoding fails.
    pub fn resolve(&self, allow: &AllowList) -> Result<String, SourceError> {
        match self {
            Self::File { name, dir } => resolve_file(name, dir, allow),
            Self::Inline { encoded } => decode_inline(encoded),
        }
    }

    /// Short description for logs; never includes script text.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::File { name, dir } => format!("{}/{name}", dir.display()),
            Self::Inline { encoded } => format!("<inline, {} encoded bytes>", encoded.len()),
        }
    }
}

/// Absolute, normalised directories scripts may be read from.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    dirs: Vec<PathBuf>,
}

impl AllowList {
    /// Build an allow-list; relative entries are made absolute against the
    /// working directory.
    ///
    /// # Errors
    /// Returns error if the working directory cannot be determined.
    pub fn new<I, P>(dirs: I) -> Result<Self, SourceError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let dirs = dirs
            .into_iter()
            .map(|dir| absolute(dir.as_ref()))
            .collect::<Result<_, _>>()?;
        Ok(Self { dirs })
    }

    /// The fixed allow-list used by the executable.
    ///
    /// # Errors
    /// Returns error if the working directory cannot be determined.
    pub fn standard() -> Result<Self, SourceError> {
        Self::new(DEFAULT_ALLOWED_DIRS)
    }

    fn find(&self, dir: &Path) -> Option<&Path> {
        self.dirs.iter().map(PathBuf::as_path).find(|d| *d == dir)
    }
}

/// Read `name` from `dir` once both pass validation.
///
/// # Errors
/// Returns error if the name or directory is rejected, or the file cannot be
/// read as UTF-8.
pub fn resolve_file(name: &str, dir: &Path, allow: &AllowList) -> Result<String, SourceError> {
    validate_name(name)?;

    let dir = absolute(dir)?;
    let base = allow
        .find(&dir)
        .ok_or_else(|| SourceError::DirectoryNotAllowed { dir: dir.clone() })?;

    let path = normalize(&base.join(name));
    if path.parent() != Some(base) {
        return Err(SourceError::Escapes { path });
    }

    let meta = match std::fs::metadata(&path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(SourceError::NotFound { path });
        }
        Err(source) => return Err(SourceError::Read { path, source }),
    };
    if !meta.is_file() {
        return Err(SourceError::NotAFile { path });
    }

    let bytes = std::fs::read(&path).map_err(|source| SourceError::Read {
        path: path.clone(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|_| SourceError::FileUtf8 { path })
}

/// Decode an inline base64 payload into script text.
///
/// # Errors
/// Returns error if the payload is empty, not base64, or not UTF-8.
pub fn decode_inline(encoded: &str) -> Result<String, SourceError> {
    let encoded = encoded.trim();
    if encoded.is_empty() {
        return Err(SourceError::EmptyPayload);
    }
    let bytes = STANDARD.decode(encoded)?;
    Ok(String::from_utf8(bytes)?)
}

/// Encode script text for [`ScriptSource::Inline`].
#[must_use]
pub fn encode_inline(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

fn validate_name(name: &str) -> Result<(), SourceError> {
    let reject = |reason| {
        Err(SourceError::InvalidName {
            name: name.to_owned(),
            reason,
        })
    };
    if name.contains(['/', '\\']) || name.contains(std::path::MAIN_SEPARATOR) {
        return reject("contains a path separator");
    }
    if name.contains("..") {
        return reject("contains '..'");
    }
    if name.contains('\0') {
        return reject("contains a NUL byte");
    }
    if name.len() <= SCRIPT_EXTENSION.len() || !name.ends_with(SCRIPT_EXTENSION) {
        return reject("must be a file name ending in .rhai");
    }
    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf, SourceError> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(SourceError::WorkingDir)?
            .join(path)
    };
    Ok(normalize(&path))
}

/// Lexical normalisation: drops `.` and folds `..` without touching the
/// filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
