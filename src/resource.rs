use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// The two resource families managed through the NPM API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    ProxyHost,
    Certificate,
}

/// Shape of a collection-typed field, used to produce its canonical empty value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    List,
    Map,
}

impl Collection {
    pub fn empty(self) -> Value {
        match self {
            Collection::List => Value::Array(Vec::new()),
            Collection::Map => Value::Object(serde_json::Map::new()),
        }
    }
}

/// Fields assigned by the server. Sending any of them back is rejected as an additional property.
const COMMON_READ_ONLY: &[&str] = &["id", "created_on", "modified_on", "owner_user_id"];
const CERTIFICATE_READ_ONLY: &[&str] = &[
    "id",
    "created_on",
    "modified_on",
    "owner_user_id",
    "expires_on",
];

const PROXY_HOST_WRITABLE: &[&str] = &[
    "domain_names",
    "forward_scheme",
    "forward_host",
    "forward_port",
    "certificate_id",
    "ssl_forced",
    "hsts_enabled",
    "hsts_subdomains",
    "http2_support",
    "block_exploits",
    "caching_enabled",
    "allow_websocket_upgrade",
    "access_list_id",
    "advanced_config",
    "enabled",
    "meta",
    "locations",
];
const CERTIFICATE_WRITABLE: &[&str] = &["provider", "nice_name", "domain_names", "meta"];

const PROXY_HOST_COLLECTIONS: &[(&str, Collection)] = &[
    ("domain_names", Collection::List),
    ("locations", Collection::List),
    ("meta", Collection::Map),
];
const CERTIFICATE_COLLECTIONS: &[(&str, Collection)] = &[
    ("domain_names", Collection::List),
    ("meta", Collection::Map),
];

impl ResourceKind {
    /// API path of the collection, relative to the base URL
    pub fn collection_path(self) -> &'static str {
        match self {
            ResourceKind::ProxyHost => "/api/nginx/proxy-hosts",
            ResourceKind::Certificate => "/api/nginx/certificates",
        }
    }

    pub fn item_path(self, id: u64) -> String {
        format!("{}/{}", self.collection_path(), id)
    }

    /// Lower-case name used inside sentences
    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::ProxyHost => "proxy host",
            ResourceKind::Certificate => "certificate",
        }
    }

    /// Capitalized name used at the start of messages
    pub fn title(self) -> &'static str {
        match self {
            ResourceKind::ProxyHost => "Proxy host",
            ResourceKind::Certificate => "Certificate",
        }
    }

    pub fn read_only_fields(self) -> &'static [&'static str] {
        match self {
            ResourceKind::ProxyHost => COMMON_READ_ONLY,
            ResourceKind::Certificate => CERTIFICATE_READ_ONLY,
        }
    }

    pub fn writable_fields(self) -> &'static [&'static str] {
        match self {
            ResourceKind::ProxyHost => PROXY_HOST_WRITABLE,
            ResourceKind::Certificate => CERTIFICATE_WRITABLE,
        }
    }

    pub fn collection_fields(self) -> &'static [(&'static str, Collection)] {
        match self {
            ResourceKind::ProxyHost => PROXY_HOST_COLLECTIONS,
            ResourceKind::Certificate => CERTIFICATE_COLLECTIONS,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "{}", self.label())
    }
}

/// A payload that may be sent on create or as the full body of an update.
pub trait WritePayload: Serialize + DeserializeOwned + Send + Sync {
    /// Checks constraints the server would reject, so invalid payloads never leave the client.
    fn validate(&self) -> Result<(), String>;
}

/// A record read from the NPM API.
///
/// Read models ignore unknown fields but insist on the required ones; `Write` is the strict
/// counterpart that only carries writable fields, and `Patch` holds the optional fields of a
/// partial update.
pub trait Resource: Serialize + DeserializeOwned + Send + Sync + Sized {
    type Write: WritePayload;
    type Patch: Serialize + Send + Sync;

    const KIND: ResourceKind;

    fn id(&self) -> u64;
    fn owner_user_id(&self) -> u64;
    fn domain_names(&self) -> &[String];

    fn validate(&self) -> Result<(), String> {
        if self.id() < 1 {
            return Err(format!("id must be >= 1, got {}", self.id()));
        }
        if self.owner_user_id() < 1 {
            return Err(format!(
                "owner_user_id must be >= 1, got {}",
                self.owner_user_id()
            ));
        }
        Ok(())
    }
}
