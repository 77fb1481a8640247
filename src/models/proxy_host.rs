use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{Display, EnumString, IntoStaticStr};

use super::{default_true, null_as_default};
use crate::resource::{Resource, ResourceKind, WritePayload};

pub const MAX_DOMAIN_NAMES: usize = 15;
pub const MAX_FORWARD_HOST_LEN: usize = 255;

/// Possible schemes a proxy host can forward to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, EnumString, IntoStaticStr, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ForwardScheme {
    Http,
    Https,
}

impl Default for ForwardScheme {
    fn default() -> Self {
        ForwardScheme::Http
    }
}

/// Reference from a proxy host to its certificate.
///
/// On the wire NPM uses `0` for "no certificate", a positive id for an existing certificate and
/// the literal `"new"` to request a certificate while creating the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CertificateRef {
    None,
    Id(u64),
    New,
}

impl Default for CertificateRef {
    fn default() -> Self {
        CertificateRef::None
    }
}

impl CertificateRef {
    pub fn id(self) -> Option<u64> {
        match self {
            CertificateRef::Id(id) => Some(id),
            _ => None,
        }
    }
}

impl From<Option<u64>> for CertificateRef {
    fn from(id: Option<u64>) -> Self {
        match id {
            Some(0) | None => CertificateRef::None,
            Some(id) => CertificateRef::Id(id),
        }
    }
}

impl Serialize for CertificateRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CertificateRef::None => serializer.serialize_u64(0),
            CertificateRef::Id(id) => serializer.serialize_u64(*id),
            CertificateRef::New => serializer.serialize_str("new"),
        }
    }
}

impl<'de> Deserialize<'de> for CertificateRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Id(u64),
            Text(String),
        }

        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(CertificateRef::None),
            Some(Raw::Id(id)) => Ok(CertificateRef::from(Some(id))),
            Some(Raw::Text(text)) if text == "new" => Ok(CertificateRef::New),
            Some(Raw::Text(text)) => Err(de::Error::invalid_value(
                de::Unexpected::Str(&text),
                &"a certificate id or \"new\"",
            )),
        }
    }
}

/// A custom location block of a proxy host.
///
/// Kept as the raw object: keys NPM adds to locations are sent back untouched on update.
pub type Location = Map<String, Value>;

/// A proxy host as returned by the API
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ProxyHost {
    pub id: u64,
    pub created_on: String,
    pub modified_on: String,
    pub owner_user_id: u64,
    pub domain_names: Vec<String>,
    pub forward_scheme: ForwardScheme,
    pub forward_host: String,
    pub forward_port: u16,
    #[serde(default)]
    pub certificate_id: CertificateRef,
    #[serde(default)]
    pub ssl_forced: bool,
    #[serde(default)]
    pub hsts_enabled: bool,
    #[serde(default)]
    pub hsts_subdomains: bool,
    #[serde(default = "default_true")]
    pub http2_support: bool,
    #[serde(default = "default_true")]
    pub block_exploits: bool,
    #[serde(default)]
    pub caching_enabled: bool,
    #[serde(default)]
    pub allow_websocket_upgrade: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub access_list_id: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub advanced_config: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub meta: Map<String, Value>,
    /// NPM reports hosts without custom locations as `null`
    #[serde(default)]
    pub locations: Option<Vec<Location>>,
}

impl ProxyHost {
    pub fn certificate(&self) -> Option<u64> {
        self.certificate_id.id()
    }
}

impl Resource for ProxyHost {
    type Write = ProxyHostWrite;
    type Patch = ProxyHostUpdate;

    const KIND: ResourceKind = ResourceKind::ProxyHost;

    fn id(&self) -> u64 {
        self.id
    }

    fn owner_user_id(&self) -> u64 {
        self.owner_user_id
    }

    fn domain_names(&self) -> &[String] {
        &self.domain_names
    }
}

/// Body of `POST /api/nginx/proxy-hosts` and `PUT /api/nginx/proxy-hosts/{id}`
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyHostWrite {
    pub domain_names: Vec<String>,
    pub forward_scheme: ForwardScheme,
    pub forward_host: String,
    pub forward_port: u16,
    #[serde(default)]
    pub certificate_id: CertificateRef,
    #[serde(default)]
    pub ssl_forced: bool,
    #[serde(default)]
    pub hsts_enabled: bool,
    #[serde(default)]
    pub hsts_subdomains: bool,
    #[serde(default = "default_true")]
    pub http2_support: bool,
    #[serde(default = "default_true")]
    pub block_exploits: bool,
    #[serde(default)]
    pub caching_enabled: bool,
    #[serde(default)]
    pub allow_websocket_upgrade: bool,
    #[serde(default)]
    pub access_list_id: u64,
    #[serde(default)]
    pub advanced_config: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub meta: Map<String, Value>,
    #[serde(default)]
    pub locations: Vec<Location>,
}

impl ProxyHostWrite {
    /// A new host with the server defaults for every optional field.
    pub fn new(
        domain_names: Vec<String>,
        forward_scheme: ForwardScheme,
        forward_host: String,
        forward_port: u16,
    ) -> Self {
        ProxyHostWrite {
            domain_names,
            forward_scheme,
            forward_host,
            forward_port,
            certificate_id: CertificateRef::None,
            ssl_forced: false,
            hsts_enabled: false,
            hsts_subdomains: false,
            http2_support: true,
            block_exploits: true,
            caching_enabled: false,
            allow_websocket_upgrade: false,
            access_list_id: 0,
            advanced_config: String::new(),
            enabled: true,
            meta: Map::new(),
            locations: Vec::new(),
        }
    }
}

impl WritePayload for ProxyHostWrite {
    fn validate(&self) -> Result<(), String> {
        validate_domain_names(&self.domain_names)?;
        validate_forward_host(&self.forward_host)?;
        validate_forward_port(self.forward_port)?;
        validate_locations(&self.locations)?;
        Ok(())
    }
}

/// Partial update of a proxy host; only the fields that are `Some` are changed.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ProxyHostUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward_scheme: Option<ForwardScheme>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<CertificateRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_forced: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hsts_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hsts_subdomains: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http2_support: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_exploits: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caching_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_websocket_upgrade: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_list_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advanced_config: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl ProxyHostUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ProxyHostUpdate::default()
    }
}

pub fn validate_domain_names(domain_names: &[String]) -> Result<(), String> {
    if domain_names.is_empty() {
        return Err("domain_names must contain at least one domain".to_string());
    }
    if domain_names.len() > MAX_DOMAIN_NAMES {
        return Err(format!(
            "domain_names must contain at most {} domains, got {}",
            MAX_DOMAIN_NAMES,
            domain_names.len()
        ));
    }
    if let Some(blank) = domain_names.iter().find(|d| d.trim().is_empty()) {
        return Err(format!("domain_names contains a blank entry {:?}", blank));
    }
    Ok(())
}

fn validate_forward_host(forward_host: &str) -> Result<(), String> {
    if forward_host.is_empty() {
        return Err("forward_host must not be empty".to_string());
    }
    if forward_host.len() > MAX_FORWARD_HOST_LEN {
        return Err(format!(
            "forward_host must be at most {} characters",
            MAX_FORWARD_HOST_LEN
        ));
    }
    Ok(())
}

fn validate_forward_port(forward_port: u16) -> Result<(), String> {
    if forward_port == 0 {
        return Err("forward_port must be between 1 and 65535".to_string());
    }
    Ok(())
}

fn validate_locations(locations: &[Location]) -> Result<(), String> {
    for (i, location) in locations.iter().enumerate() {
        match location.get("path") {
            Some(Value::String(path)) if !path.trim().is_empty() => {}
            _ => return Err(format!("locations[{}] needs a non-empty `path`", i)),
        }
    }
    Ok(())
}
