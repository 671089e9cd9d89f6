//! Loading of models and other external resources.
//!
//! Resources are addressed by a [`Location`], either a local path or an HTTP(S) URL. Shared
//! bundles (such as the hand landmark network) are loaded at most once per process, while the
//! gesture model is always fetched fresh so that a retrained model is picked up on restart.

use std::{
    collections::HashMap,
    fmt,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::bail;
use once_cell::sync::Lazy;
use reqwest::header::{CACHE_CONTROL, PRAGMA};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Where a resource is loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    Path(PathBuf),
    Url(String),
}

impl Location {
    /// Interprets `s` as a URL if it has an `http` or `https` scheme, and as a path otherwise.
    pub fn parse(s: &str) -> Self {
        if s.starts_with("http://") || s.starts_with("https://") {
            Location::Url(s.to_string())
        } else {
            Location::Path(s.into())
        }
    }

    fn cache_key(&self) -> String {
        match self {
            Location::Path(path) => format!("file:{}", path.display()),
            Location::Url(url) => url.clone(),
        }
    }
}

impl From<&str> for Location {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Path(path) => write!(f, "{}", path.display()),
            Location::Url(url) => f.write_str(url),
        }
    }
}

/// The kinds of resources the detector loads, used to label load failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    LandmarkModel,
    GestureModel,
    LabelTable,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::LandmarkModel => "hand landmark model",
            ResourceKind::GestureModel => "gesture model",
            ResourceKind::LabelTable => "class label table",
        })
    }
}

/// A resource could not be loaded.
#[derive(Debug, thiserror::Error)]
#[error("failed to load {kind} from {location}: {source}")]
pub struct LoadError {
    kind: ResourceKind,
    location: Location,
    #[source]
    source: BoxError,
}

impl LoadError {
    pub fn new<E: Into<BoxError>>(kind: ResourceKind, location: Location, source: E) -> Self {
        Self {
            kind,
            location,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn location(&self) -> &Location {
        &self.location
    }
}

static BUNDLES: Lazy<Mutex<HashMap<String, Arc<[u8]>>>> = Lazy::new(Default::default);

/// Loads a shared bundle, reusing the data if the same location was loaded before.
///
/// Failed loads are not cached and will be retried by the next call.
pub fn load_bundle(kind: ResourceKind, location: &Location) -> Result<Arc<[u8]>, LoadError> {
    let key = location.cache_key();
    // Holding the lock across the fetch makes concurrent requests for one bundle share a load.
    let mut bundles = BUNDLES.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(data) = bundles.get(&key) {
        log::trace!("{kind} already loaded from {location}");
        return Ok(data.clone());
    }

    let data: Arc<[u8]> = read(location, false)
        .map_err(|e| LoadError::new(kind, location.clone(), e))?
        .into();
    log::debug!("loaded {kind} from {location} ({} bytes)", data.len());
    bundles.insert(key, data.clone());
    Ok(data)
}

/// Fetches a resource as an opaque blob, bypassing all caches.
pub fn fetch_fresh(kind: ResourceKind, location: &Location) -> Result<Vec<u8>, LoadError> {
    let data = read(location, true).map_err(|e| LoadError::new(kind, location.clone(), e))?;
    log::debug!("fetched {kind} from {location} ({} bytes)", data.len());
    Ok(data)
}

fn read(location: &Location, fresh: bool) -> anyhow::Result<Vec<u8>> {
    match location {
        Location::Path(path) => Ok(std::fs::read(path)?),
        Location::Url(url) => {
            let client = reqwest::blocking::Client::new();
            let mut request = client.get(url);
            if fresh {
                request = request
                    .header(CACHE_CONTROL, "no-cache, no-store")
                    .header(PRAGMA, "no-cache");
            }
            let response = request.send()?;
            if !response.status().is_success() {
                bail!("server responded with {}", response.status());
            }
            Ok(response.bytes()?.to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{env, fs};

    use super::*;

    fn temp_file(contents: &[u8]) -> PathBuf {
        let path = env::temp_dir().join(format!("mudra-resource-{}.bin", fastrand::u64(..)));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn parse_location() {
        assert_eq!(
            Location::parse("https://example.com/model.onnx"),
            Location::Url("https://example.com/model.onnx".into())
        );
        assert_eq!(
            Location::parse("models/model.onnx"),
            Location::Path("models/model.onnx".into())
        );
    }

    #[test]
    fn bundles_load_once() {
        let path = temp_file(b"bundle");
        let location = Location::Path(path.clone());
        let first = load_bundle(ResourceKind::LandmarkModel, &location).unwrap();
        fs::remove_file(&path).unwrap();

        let second = load_bundle(ResourceKind::LandmarkModel, &location).unwrap();
        assert_eq!(&*second, b"bundle");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn fresh_fetch_is_not_cached() {
        let path = temp_file(b"v1");
        let location = Location::Path(path.clone());
        assert_eq!(
            fetch_fresh(ResourceKind::GestureModel, &location).unwrap(),
            b"v1"
        );
        fs::write(&path, b"v2").unwrap();
        assert_eq!(
            fetch_fresh(ResourceKind::GestureModel, &location).unwrap(),
            b"v2"
        );
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn errors_are_labeled() {
        let location = Location::parse("/nonexistent/mudra/labels.json");
        let err = fetch_fresh(ResourceKind::LabelTable, &location).unwrap_err();
        assert_eq!(err.kind(), ResourceKind::LabelTable);
        assert_eq!(err.location(), &location);
        assert!(err
            .to_string()
            .starts_with("failed to load class label table from /nonexistent/mudra/labels.json"));

        let err = load_bundle(ResourceKind::LandmarkModel, &location).unwrap_err();
        assert_eq!(err.kind(), ResourceKind::LandmarkModel);
    }
}
