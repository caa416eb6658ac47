//! Resources referenced from a response: script and style dependencies of connector types
//! and theme files used by legacy paint.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};
use url::Url;

use crate::connector::ConnectorType;

/// scheme of resources served from the connector resource registry
pub const CONNECTOR_PROTOCOL: &str = "connector";
/// prefix of the URLs the client uses to fetch registered resources
pub const CONNECTOR_PROTOCOL_PREFIX: &str = "connector://";

/// Names the client may fetch with the `connector://` scheme, with the connector type
/// that declared each of them.
#[derive(Debug, Default)]
pub struct ConnectorResources {
    contexts: HashMap<String, &'static ConnectorType>,
}

impl ConnectorResources {
    /// an empty registry
    pub fn new() -> Self {
        ConnectorResources::default()
    }

    /// Resolves a dependency declared by `context` into the URL sent to the client.
    ///
    /// `connector://` URLs and bare paths are registered and returned as `connector:///name`.
    /// Any other absolute URL, including protocol relative ones, is returned unchanged.
    pub fn register_resource(
        &mut self,
        resource_uri: &str,
        context: &'static ConnectorType,
    ) -> String {
        // the name after `connector://` would parse as a host
        if let Some(name) = resource_uri.strip_prefix(CONNECTOR_PROTOCOL_PREFIX) {
            return self.register(name.trim_start_matches('/').to_string(), context);
        }
        if resource_uri.starts_with("//") {
            return resource_uri.to_string();
        }
        match Url::parse(resource_uri) {
            Ok(url) if url.scheme() == CONNECTOR_PROTOCOL => {
                let name = url.path().trim_start_matches('/').to_string();
                self.register(name, context)
            }
            Ok(_) => resource_uri.to_string(),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                self.register(resource_uri.to_string(), context)
            }
            Err(e) => {
                warn!("could not parse resource url {}: {}", resource_uri, e);
                resource_uri.to_string()
            }
        }
    }

    fn register(&mut self, name: String, context: &'static ConnectorType) -> String {
        let url = format!("{}/{}", CONNECTOR_PROTOCOL_PREFIX, name);
        match self.contexts.get(&name) {
            Some(old) if *old != context => warn!(
                "resource {} defined by both {} and {}, the resource from {} will be used",
                name, context, old, old
            ),
            Some(_) => {}
            None => {
                debug!("registered connector resource {} for {}", name, context);
                self.contexts.insert(name, context);
            }
        }
        url
    }

    /// the connector type a resource was registered for
    pub fn context(&self, name: &str) -> Option<&'static ConnectorType> {
        self.contexts.get(name).copied()
    }
}

/// Source of theme files such as custom layout templates.
pub trait ThemeResources: Send + Sync {
    /// the content of `path` in `theme`, `None` when it does not exist
    fn resource(&self, theme: &str, path: &str) -> Option<String>;
}

/// Reads theme files from `<root>/<theme>/<path>`.
#[derive(Debug, Clone)]
pub struct DirectoryThemeResources {
    root: PathBuf,
}

impl DirectoryThemeResources {
    /// themes are directories below `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryThemeResources { root: root.into() }
    }
}

fn is_plain_relative(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_)))
}

impl ThemeResources for DirectoryThemeResources {
    fn resource(&self, theme: &str, path: &str) -> Option<String> {
        let relative = Path::new(theme).join(path);
        if !is_plain_relative(&relative) {
            warn!("refusing theme resource outside the theme directory: {}", relative.display());
            return None;
        }
        match fs::read_to_string(self.root.join(&relative)) {
            Ok(content) => Some(content),
            Err(e) => {
                debug!("theme resource {} not readable: {}", relative.display(), e);
                None
            }
        }
    }
}
