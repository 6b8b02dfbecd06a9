//! Partition addressing.
//!
//! Partitions are addressed as `scheme://authority/<owner>/<name>`. The
//! first path segment names the identity that owns the partition, which is
//! what a redeemer persists after a successful handshake: the full URL can
//! always be rebuilt from it with [`HostConfig::shared_partition`].

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Path segment of every identity's management partition.
pub const MANAGEMENT_SEGMENT: &str = "__management";

/// URL of a partition in the replicated store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartitionUrl(String);

impl PartitionUrl {
    /// Parses and validates a partition URL.
    pub fn parse(url: impl Into<String>) -> ProtocolResult<Self> {
        let url = url.into();
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| ProtocolError::InvalidUrl(format!("missing scheme in {url:?}")))?;
        if scheme.is_empty() {
            return Err(ProtocolError::InvalidUrl(format!("empty scheme in {url:?}")));
        }

        let (authority, path) = rest
            .split_once('/')
            .ok_or_else(|| ProtocolError::InvalidUrl(format!("missing path in {url:?}")))?;
        if authority.is_empty() {
            return Err(ProtocolError::InvalidUrl(format!("empty authority in {url:?}")));
        }
        if path.is_empty() || path.split('/').any(str::is_empty) {
            return Err(ProtocolError::InvalidUrl(format!("empty path segment in {url:?}")));
        }

        Ok(Self(url))
    }

    /// Returns the URL as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `scheme://authority/`.
    pub fn root(&self) -> &str {
        &self.0[..self.0.len() - self.path().len()]
    }

    /// Returns the path after the root, without a leading slash.
    pub fn path(&self) -> &str {
        // parse() guarantees both separators are present
        let after_scheme = self.0.find("://").map(|i| i + 3).unwrap_or(0);
        let rest = &self.0[after_scheme..];
        rest.find('/').map(|i| &rest[i + 1..]).unwrap_or("")
    }

    /// Returns the identity that owns this partition.
    pub fn owner_segment(&self) -> &str {
        self.path().split('/').next().unwrap_or("")
    }

    /// Returns true if this is a management partition.
    pub fn is_management(&self) -> bool {
        self.path().split('/').nth(1) == Some(MANAGEMENT_SEGMENT)
    }
}

impl fmt::Display for PartitionUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PartitionUrl {
    type Error = ProtocolError;

    fn try_from(value: String) -> ProtocolResult<Self> {
        Self::parse(value)
    }
}

impl From<PartitionUrl> for String {
    fn from(url: PartitionUrl) -> Self {
        url.0
    }
}

/// Where the store lives and which application path partitions use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Store root, always ending in `/`.
    pub root: String,
    /// Application path segment appended to every data partition.
    pub app_path: String,
}

impl HostConfig {
    /// Creates a host configuration for `partshare://host:port/`.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            root: format!("partshare://{host}:{port}/"),
            app_path: "permissionchangedemo".into(),
        }
    }

    /// Sets the application path segment.
    pub fn with_app_path(mut self, app_path: impl Into<String>) -> Self {
        self.app_path = app_path.into();
        self
    }

    /// Default data partition of an identity.
    pub fn user_partition(&self, identity: &str) -> ProtocolResult<PartitionUrl> {
        PartitionUrl::parse(format!("{}{}/{}", self.root, identity, self.app_path))
    }

    /// Management partition of an identity.
    pub fn management_partition(&self, identity: &str) -> ProtocolResult<PartitionUrl> {
        PartitionUrl::parse(format!("{}{}/{}", self.root, identity, MANAGEMENT_SEGMENT))
    }

    /// Shared partition rebuilt from a persisted shared partition path.
    pub fn shared_partition(&self, shared_path: &str) -> ProtocolResult<PartitionUrl> {
        self.user_partition(shared_path)
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 9080)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_components() {
        let url = PartitionUrl::parse("partshare://127.0.0.1:9080/abc123/permissionchangedemo")
            .unwrap();
        assert_eq!(url.root(), "partshare://127.0.0.1:9080/");
        assert_eq!(url.path(), "abc123/permissionchangedemo");
        assert_eq!(url.owner_segment(), "abc123");
        assert!(!url.is_management());

        // index 3 of a '/' split is the owner
        let parts: Vec<&str> = url.as_str().split('/').collect();
        assert_eq!(parts[3], url.owner_segment());
    }

    #[test]
    fn parse_rejects_bad_urls() {
        assert!(PartitionUrl::parse("no-scheme/path").is_err());
        assert!(PartitionUrl::parse("://host/path").is_err());
        assert!(PartitionUrl::parse("partshare://host").is_err());
        assert!(PartitionUrl::parse("partshare:///path").is_err());
        assert!(PartitionUrl::parse("partshare://host/").is_err());
        assert!(PartitionUrl::parse("partshare://host/a//b").is_err());
    }

    #[test]
    fn host_composition() {
        let host = HostConfig::new("localhost", 9080).with_app_path("demo");
        let user = host.user_partition("id1").unwrap();
        assert_eq!(user.as_str(), "partshare://localhost:9080/id1/demo");

        let mgmt = host.management_partition("id1").unwrap();
        assert_eq!(mgmt.as_str(), "partshare://localhost:9080/id1/__management");
        assert!(mgmt.is_management());

        assert_eq!(host.shared_partition("id1").unwrap(), user);
    }

    proptest! {
        #[test]
        fn owner_survives_composition(
            identity in "[0-9a-f]{32}",
            app in "[a-z][a-z0-9_-]{0,15}",
            port in 1u16..,
        ) {
            let host = HostConfig::new("127.0.0.1", port).with_app_path(app.clone());
            let url = host.user_partition(&identity).unwrap();
            prop_assert_eq!(url.owner_segment(), identity.as_str());
            prop_assert_eq!(url.root(), host.root.as_str());
            prop_assert_eq!(host.shared_partition(url.owner_segment()).unwrap(), url);
        }
    }

    #[test]
    fn serde_validates() {
        let url = PartitionUrl::parse("partshare://h:1/a/b").unwrap();
        let mut buf = Vec::new();
        ciborium::into_writer(&url, &mut buf).unwrap();
        let back: PartitionUrl = ciborium::from_reader(buf.as_slice()).unwrap();
        assert_eq!(back, url);

        let mut buf = Vec::new();
        ciborium::into_writer(&"not a url".to_string(), &mut buf).unwrap();
        let bad: Result<PartitionUrl, _> = ciborium::from_reader(buf.as_slice());
        assert!(bad.is_err());
    }
}
