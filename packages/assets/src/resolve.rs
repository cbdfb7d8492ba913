//! Deterministic storage keys and public URL mapping.
//!
//! A key is `{kind}/{module or directory}/{id}.{ext}`. Nothing supplied by
//! the client other than the module/directory hint takes part in it.

use std::fmt;
use std::str::FromStr;

use crate::sniff::MediaKind;

const MAX_DIRECTORY_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown module: {0}")]
    UnknownModule(String),
    #[error("invalid directory: {0}")]
    InvalidDirectory(&'static str),
    #[error("invalid session name: {0}")]
    InvalidName(&'static str),
    #[error("url does not point at this asset store: {0}")]
    ForeignUrl(String),
    #[error("path is outside the asset root: {0}")]
    OutsideRoot(String),
}

/// Entity families that own uploaded assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Module {
    User,
    Article,
    Comment,
    Reply,
    Link,
    Update,
    Lemon,
}

impl Module {
    pub const ALL: [Module; 7] = [
        Module::User,
        Module::Article,
        Module::Comment,
        Module::Reply,
        Module::Link,
        Module::Update,
        Module::Lemon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Module::User => "user",
            Module::Article => "article",
            Module::Comment => "comment",
            Module::Reply => "reply",
            Module::Link => "link",
            Module::Update => "update",
            Module::Lemon => "lemon",
        }
    }

    /// Legacy numeric code still sent by older clients.
    pub fn code(&self) -> u8 {
        match self {
            Module::User => 1,
            Module::Article => 2,
            Module::Comment => 3,
            Module::Reply => 4,
            Module::Link => 5,
            Module::Update => 6,
            Module::Lemon => 7,
        }
    }

    pub fn from_code(code: u8) -> Option<Module> {
        Module::ALL.into_iter().find(|m| m.code() == code)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Module {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code) = s.parse::<u8>() {
            return Module::from_code(code).ok_or_else(|| ResolveError::UnknownModule(s.into()));
        }
        Module::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ResolveError::UnknownModule(s.into()))
    }
}

/// Where under the media kind an upload should land.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ModuleHint {
    #[default]
    None,
    Module(Module),
    Directory(String),
}

impl ModuleHint {
    /// Build a hint from the raw `module` and `path` form fields.
    ///
    /// A directory takes precedence over a module when both are supplied.
    /// Blank values count as absent.
    pub fn parse(module: Option<&str>, path: Option<&str>) -> Result<Self, ResolveError> {
        if let Some(path) = path.map(str::trim).filter(|p| !p.is_empty()) {
            return Ok(ModuleHint::Directory(validate_directory(path)?));
        }
        match module.map(str::trim).filter(|m| !m.is_empty()) {
            Some(module) => Ok(ModuleHint::Module(module.parse()?)),
            None => Ok(ModuleHint::None),
        }
    }
}

/// Key prefix for an upload of `kind` with the given hint.
pub fn resolve(kind: MediaKind, hint: &ModuleHint) -> String {
    match hint {
        ModuleHint::None => kind.as_str().to_string(),
        ModuleHint::Module(module) => format!("{kind}/{module}"),
        ModuleHint::Directory(dir) => format!("{kind}/{dir}"),
    }
}

pub fn asset_key(prefix: &str, id: u64, extension: &str) -> String {
    format!("{prefix}/{id}.{extension}")
}

/// Validate a client directory hint, returning it trimmed of surrounding
/// slashes and whitespace.
pub fn validate_directory(path: &str) -> Result<String, ResolveError> {
    let trimmed = path.trim().trim_matches('/');

    if trimmed.is_empty() {
        return Err(ResolveError::InvalidDirectory("directory cannot be empty"));
    }
    if trimmed.len() > MAX_DIRECTORY_LEN {
        return Err(ResolveError::InvalidDirectory(
            "directory exceeds maximum length of 256 characters",
        ));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.'))
    {
        return Err(ResolveError::InvalidDirectory(
            "directory contains invalid characters (allowed: a-zA-Z0-9, /, -, _, .)",
        ));
    }
    for segment in trimmed.split('/') {
        if segment.is_empty() {
            return Err(ResolveError::InvalidDirectory(
                "directory must not contain empty segments",
            ));
        }
        if segment == ".." {
            return Err(ResolveError::InvalidDirectory(
                "directory must not contain '..' traversal",
            ));
        }
        if segment.starts_with('.') {
            return Err(ResolveError::InvalidDirectory(
                "directory segments must not start with '.'",
            ));
        }
    }

    Ok(trimmed.to_string())
}

/// Validate a chunk session name. Names become a single directory on disk.
pub fn validate_session_name(name: &str) -> Result<&str, ResolveError> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(ResolveError::InvalidName("name cannot be empty"));
    }
    if trimmed.len() > MAX_DIRECTORY_LEN {
        return Err(ResolveError::InvalidName("name is too long"));
    }
    if trimmed.chars().any(|c| c.is_ascii_control()) {
        return Err(ResolveError::InvalidName(
            "control characters are not allowed",
        ));
    }
    if trimmed.contains('/') || trimmed.contains('\\') {
        return Err(ResolveError::InvalidName("path separators are not allowed"));
    }
    if trimmed.contains("..") {
        return Err(ResolveError::InvalidName("'..' is not allowed"));
    }
    if trimmed.starts_with('.') {
        return Err(ResolveError::InvalidName("name must not start with '.'"));
    }

    Ok(trimmed)
}

/// Maps stored keys to public URLs and back.
#[derive(Debug, Clone)]
pub struct AssetLocator {
    public_prefix: String,
    root: String,
}

impl AssetLocator {
    /// `public_prefix` is what clients see in front of every key, e.g.
    /// `https://cdn.example.com/upload` or `/upload`. `root` is the asset root
    /// segment clients may include in relative paths, e.g. `upload`.
    pub fn new(public_prefix: impl Into<String>, root: impl Into<String>) -> Self {
        let public_prefix = public_prefix.into().trim_end_matches('/').to_string();
        let root = root.into().trim_matches('/').to_string();
        Self {
            public_prefix,
            root,
        }
    }

    pub fn public_prefix(&self) -> &str {
        &self.public_prefix
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_prefix, key.trim_start_matches('/'))
    }

    /// Normalize a URL or path that a client or stored content refers to
    /// back to a storage key.
    pub fn normalize(&self, input: &str) -> Result<String, ResolveError> {
        let raw = input.trim();
        let raw = raw.split(['?', '#']).next().unwrap_or_default();

        let mut rest = match raw.strip_prefix(self.public_prefix.as_str()) {
            Some(rest) if !self.public_prefix.is_empty() && rest.starts_with('/') => rest,
            _ if raw.contains("://") || raw.starts_with("//") => {
                return Err(ResolveError::ForeignUrl(raw.to_string()));
            }
            _ => raw,
        };

        rest = rest.trim_start_matches('/');
        if !self.root.is_empty()
            && let Some(stripped) = rest.strip_prefix(self.root.as_str())
            && stripped.starts_with('/')
        {
            rest = stripped.trim_start_matches('/');
        }

        let outside = || ResolveError::OutsideRoot(input.trim().to_string());
        if rest.is_empty() || rest.contains('\\') || rest.contains('\0') {
            return Err(outside());
        }

        let segments: Vec<&str> = rest.split('/').collect();
        if segments.len() < 2
            || segments
                .iter()
                .any(|s| s.is_empty() || *s == "." || *s == "..")
        {
            return Err(outside());
        }
        if segments[0].parse::<MediaKind>().is_err() {
            return Err(outside());
        }

        Ok(rest.to_string())
    }
}
