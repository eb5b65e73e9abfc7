//! The watch source abstraction and endpoint-based construction.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::change::Change;
use crate::config::SourceSpec;
use crate::directory::DirectorySource;
use crate::error::{Result, SourceError};
use crate::playback::PlaybackSource;

/// Trait for anything that watches a backend and reports changes.
///
/// Sources are driven by a single task: `connect` once, then `next_change`
/// until it returns `Ok(None)` or an error, then `disconnect`. Transient
/// backend errors are the source's own business; an `Err` from
/// `next_change` ends the watch.
#[async_trait]
pub trait WatchSource: Send {
    /// Endpoint this source watches.
    fn endpoint(&self) -> &str;

    /// Establish the connection to the backend.
    async fn connect(&mut self) -> Result<()>;

    /// Wait for the next change. `Ok(None)` means the source is exhausted.
    async fn next_change(&mut self) -> Result<Option<Change>>;

    /// Release backend resources.
    async fn disconnect(&mut self) {}
}

/// Builds sources from specs.
pub trait SourceFactory: Send + Sync {
    /// Build the source for a spec. Failures are reported, never panicked.
    fn build(&self, spec: &SourceSpec) -> Result<Box<dyn WatchSource>>;
}

/// Factory that picks a built-in source from the endpoint scheme.
///
/// - `dir://` and `file://` watch a local directory
/// - `replay:` replays a recorded JSON-lines file
#[derive(Debug, Clone, Copy, Default)]
pub struct EndpointFactory;

impl SourceFactory for EndpointFactory {
    fn build(&self, spec: &SourceSpec) -> Result<Box<dyn WatchSource>> {
        let url = Url::parse(&spec.endpoint).map_err(|e| SourceError::InvalidEndpoint {
            endpoint: spec.endpoint.clone(),
            reason: e.to_string(),
        })?;

        debug!(source = %spec.name, scheme = url.scheme(), "building source");

        match url.scheme() {
            "dir" | "file" => Ok(Box::new(DirectorySource::new(
                spec.endpoint.clone(),
                endpoint_path(&url, &spec.endpoint)?,
                spec.settings.clone(),
            ))),
            "replay" => Ok(Box::new(PlaybackSource::new(
                spec.endpoint.clone(),
                endpoint_path(&url, &spec.endpoint)?,
            ))),
            scheme => Err(SourceError::UnsupportedEndpoint {
                endpoint: spec.endpoint.clone(),
                scheme: scheme.to_string(),
            }),
        }
    }
}

/// Endpoint for a local path under `scheme`, escaping each path segment so
/// `#`, `?` and `%` in file names survive URL parsing.
///
/// The inverse of what [`EndpointFactory`] does when it builds the source.
pub fn local_endpoint(scheme: &str, path: &Path) -> String {
    let path = path.to_string_lossy();
    let segments: Vec<_> = path.split('/').map(urlencoding::encode).collect();
    format!("{scheme}:{}", segments.join("/"))
}

/// Local path named by an endpoint. `scheme:relative/path` stays relative.
fn endpoint_path(url: &Url, endpoint: &str) -> Result<PathBuf> {
    let invalid = |reason: String| SourceError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };

    if url.scheme() == "file" {
        return url
            .to_file_path()
            .map_err(|()| invalid("endpoint does not name a local path".to_string()));
    }

    match url.host_str() {
        None | Some("") | Some("localhost") => {}
        Some(host) => return Err(invalid(format!("remote host {host} is not supported"))),
    }

    let decoded = urlencoding::decode(url.path()).map_err(|e| invalid(e.to_string()))?;
    Ok(PathBuf::from(decoded.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_factory_builds_directory_source() {
        let source = EndpointFactory
            .build(&SourceSpec::new("local", "dir:///tmp/watched"))
            .unwrap();
        assert_eq!(source.endpoint(), "dir:///tmp/watched");
    }

    #[test]
    fn test_factory_builds_relative_playback_source() {
        let source = EndpointFactory
            .build(&SourceSpec::new("replay", "replay:recordings/day1.jsonl"))
            .unwrap();
        assert_eq!(source.endpoint(), "replay:recordings/day1.jsonl");
    }

    #[test]
    fn test_factory_rejects_unknown_scheme() {
        let result = EndpointFactory.build(&SourceSpec::new("kube", "https://api.example:6443"));
        assert!(matches!(
            result,
            Err(SourceError::UnsupportedEndpoint { ref scheme, .. }) if scheme == "https"
        ));
    }

    #[test]
    fn test_factory_rejects_garbage() {
        let result = EndpointFactory.build(&SourceSpec::new("bad", "not an endpoint"));
        assert!(matches!(result, Err(SourceError::InvalidEndpoint { .. })));
    }

    #[test]
    fn test_factory_rejects_remote_host() {
        let result = EndpointFactory.build(&SourceSpec::new("remote", "dir://fileserver/share"));
        assert!(matches!(result, Err(SourceError::InvalidEndpoint { .. })));
    }

    #[test]
    fn test_endpoint_path_decodes_escapes() {
        let url = Url::parse("dir:///srv/my%20data").unwrap();
        assert_eq!(
            endpoint_path(&url, "dir:///srv/my%20data").unwrap(),
            PathBuf::from("/srv/my data")
        );
    }

    #[test]
    fn test_local_endpoint_escapes_reserved_characters() {
        let path = Path::new("/tmp/run#2 (copy)?.jsonl");
        let endpoint = local_endpoint("replay", path);
        assert_eq!(endpoint, "replay:/tmp/run%232%20%28copy%29%3F.jsonl");

        let url = Url::parse(&endpoint).unwrap();
        assert_eq!(endpoint_path(&url, &endpoint).unwrap(), path);
    }

    #[test]
    fn test_local_endpoint_keeps_relative_paths_relative() {
        let path = Path::new("recordings/50%/day#1.jsonl");
        let endpoint = local_endpoint("replay", path);
        assert_eq!(endpoint, "replay:recordings/50%25/day%231.jsonl");

        let url = Url::parse(&endpoint).unwrap();
        assert_eq!(endpoint_path(&url, &endpoint).unwrap(), path);
        assert!(EndpointFactory.build(&SourceSpec::new("replay", endpoint)).is_ok());
    }

    #[test]
    fn test_endpoint_path_for_absolute_url() {
        let url = Url::parse("dir:///var/data").unwrap();
        assert_eq!(
            endpoint_path(&url, "dir:///var/data").unwrap(),
            PathBuf::from("/var/data")
        );
    }
}
