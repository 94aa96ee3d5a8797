/*!
    Source locator resolution.

    A locator is either a URI (anything containing `://`) or a plain path. Plain
    paths are tried as given, then relative to the media root, then relative to
    the media root with each recognized media extension appended.
*/

use std::fmt;
use std::path::{Path, PathBuf};

use url::Url;

use media_types::{EngineError, Result};

/**
    URI schemes a decode engine can be pointed at.
*/
pub const SUPPORTED_SCHEMES: &[&str] = &[
    "file", "http", "https", "rtmp", "rtmps", "mms", "rtp", "rtsp", "udp", "testsrc",
];

/**
    File extensions recognized as playable media.
*/
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "mov", "mp4", "dv", "flv", "mpg", "mkv", "mxf", "ts", "mp3", "wav", "wma", "nut", "flac",
    "opus", "ogg", "webm",
];

/**
    What kind of source a locator resolved to.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// A local file that exists and has a recognized extension.
    File(PathBuf),
    /// A remote stream, keyed by URI scheme.
    Network { scheme: String },
    /// The built-in test pattern generator.
    Synthetic,
}

/**
    A locator that passed resolution.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedSource {
    /// The locator as given by the caller.
    pub locator: String,
    /// Canonical URI handed to the engine.
    pub uri: Url,
    pub kind: SourceKind,
}

impl ResolvedSource {
    pub fn scheme(&self) -> &str {
        self.uri.scheme()
    }

    pub fn is_live(&self) -> bool {
        matches!(self.kind, SourceKind::Network { .. })
    }

    /**
        Short human-readable name (file stem, host, or scheme).
    */
    pub fn name(&self) -> String {
        match &self.kind {
            SourceKind::File(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.locator.clone()),
            SourceKind::Network { scheme } => self
                .uri
                .host_str()
                .map(str::to_owned)
                .unwrap_or_else(|| scheme.clone()),
            SourceKind::Synthetic => "testsrc".to_owned(),
        }
    }
}

impl fmt::Display for ResolvedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uri.as_str())
    }
}

/**
    Resolve a locator to a readable source.

    Fails with [`EngineError::InvalidSource`] if the locator uses an unknown
    scheme, names no existing file, or names a file of an unrecognized type.
*/
pub fn resolve_source(locator: &str, media_root: Option<&Path>) -> Result<ResolvedSource> {
    let trimmed = locator.trim();
    if trimmed.is_empty() {
        return Err(EngineError::invalid_source(locator, "empty locator"));
    }

    if trimmed.contains("://") {
        return resolve_uri(trimmed);
    }

    let path = find_file(trimmed, media_root)
        .ok_or_else(|| EngineError::invalid_source(locator, "file not found"))?;
    file_source(locator, &path)
}

fn resolve_uri(locator: &str) -> Result<ResolvedSource> {
    let uri = Url::parse(locator)
        .map_err(|e| EngineError::invalid_source(locator, format!("malformed uri: {e}")))?;
    let scheme = uri.scheme().to_ascii_lowercase();

    if !SUPPORTED_SCHEMES.contains(&scheme.as_str()) {
        return Err(EngineError::invalid_source(
            locator,
            format!("unsupported protocol '{scheme}'"),
        ));
    }

    match scheme.as_str() {
        "file" => {
            let path = uri
                .to_file_path()
                .map_err(|_| EngineError::invalid_source(locator, "not a local file uri"))?;
            if !path.is_file() {
                return Err(EngineError::invalid_source(locator, "file not found"));
            }
            file_source(locator, &path)
        }
        "testsrc" => Ok(ResolvedSource {
            locator: locator.to_owned(),
            uri,
            kind: SourceKind::Synthetic,
        }),
        _ => Ok(ResolvedSource {
            locator: locator.to_owned(),
            uri,
            kind: SourceKind::Network { scheme },
        }),
    }
}

fn find_file(locator: &str, media_root: Option<&Path>) -> Option<PathBuf> {
    let direct = PathBuf::from(locator);
    if direct.is_file() {
        return Some(direct);
    }

    let root = media_root?;
    let rooted = root.join(locator);
    if rooted.is_file() {
        return Some(rooted);
    }

    MEDIA_EXTENSIONS
        .iter()
        .map(|ext| root.join(format!("{locator}.{ext}")))
        .find(|candidate| candidate.is_file())
}

fn file_source(locator: &str, path: &Path) -> Result<ResolvedSource> {
    if !has_media_extension(path) {
        return Err(EngineError::invalid_source(
            locator,
            "unsupported file extension",
        ));
    }

    let absolute = path
        .canonicalize()
        .map_err(|e| EngineError::invalid_source(locator, e.to_string()))?;
    let uri = Url::from_file_path(&absolute)
        .map_err(|_| EngineError::invalid_source(locator, "path cannot be expressed as a uri"))?;

    Ok(ResolvedSource {
        locator: locator.to_owned(),
        uri,
        kind: SourceKind::File(absolute),
    })
}

/**
    Returns true if `path` ends in one of [`MEDIA_EXTENSIONS`] (case-insensitive).
*/
pub fn has_media_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            MEDIA_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn nonexistent_path_is_invalid() {
        let err = resolve_source("/definitely/not/here.mp4", None).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSource { .. }));
    }

    #[test]
    fn unknown_scheme_is_invalid() {
        let err = resolve_source("gopher://example.com/clip", None).unwrap_err();
        assert!(err.to_string().contains("unsupported protocol"));
    }

    #[test]
    fn network_schemes_resolve_without_io() {
        let source = resolve_source("rtmp://live.example.com/app/key", None).unwrap();
        assert_eq!(source.scheme(), "rtmp");
        assert!(source.is_live());
        assert_eq!(source.name(), "live.example.com");
    }

    #[test]
    fn testsrc_is_synthetic() {
        let source = resolve_source("testsrc://?duration=2", None).unwrap();
        assert_eq!(source.kind, SourceKind::Synthetic);
        assert!(!source.is_live());
    }

    #[test]
    fn existing_file_becomes_file_uri() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        fs::write(&path, b"").unwrap();

        let source = resolve_source(path.to_str().unwrap(), None).unwrap();
        assert_eq!(source.scheme(), "file");
        assert!(matches!(source.kind, SourceKind::File(_)));
        assert_eq!(source.name(), "clip.mp4");
    }

    #[test]
    fn media_root_relative_with_extension_search() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("shows")).unwrap();
        fs::write(dir.path().join("shows/intro.mov"), b"").unwrap();

        let source = resolve_source("shows/intro", Some(dir.path())).unwrap();
        match source.kind {
            SourceKind::File(path) => assert!(path.ends_with("shows/intro.mov")),
            other => panic!("unexpected kind {other:?}"),
        }

        let source = resolve_source("shows/intro.mov", Some(dir.path())).unwrap();
        assert_eq!(source.name(), "intro.mov");
    }

    #[test]
    fn unrecognized_extension_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"hello").unwrap();

        let err = resolve_source(path.to_str().unwrap(), None).unwrap_err();
        assert!(err.to_string().contains("unsupported file extension"));
    }

    #[test]
    fn file_uri_must_exist() {
        let err = resolve_source("file:///definitely/not/here.mkv", None).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSource { .. }));
    }
}
