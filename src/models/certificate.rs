use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::convert::TryFrom;
use strum_macros::{Display, EnumString, IntoStaticStr};

use super::null_as_default;
use super::proxy_host::validate_domain_names;
use crate::resource::{Resource, ResourceKind, WritePayload};

/// Possible certificate providers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, EnumString, IntoStaticStr, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Provider {
    Letsencrypt,
    Other,
}

impl Default for Provider {
    fn default() -> Self {
        Provider::Letsencrypt
    }
}

/// Settings of a DNS-01 challenge
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct DnsChallenge {
    pub dns_provider: String,
    pub dns_provider_credentials: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagation_seconds: Option<u32>,
}

/// Challenge-dependent `meta` of a certificate.
///
/// The HTTP challenge carries no keys at all. Keys that do not belong to the
/// challenge are dropped on read and never written back.
#[derive(Clone, Debug, PartialEq)]
pub enum CertificateMeta {
    Http,
    Dns(DnsChallenge),
}

impl Default for CertificateMeta {
    fn default() -> Self {
        CertificateMeta::Http
    }
}

impl CertificateMeta {
    /// Interprets a `meta` object as returned by the API.
    pub fn from_map(meta: &Map<String, Value>) -> Result<Self, String> {
        let dns = matches!(meta.get("dns_challenge"), Some(Value::Bool(true)));
        if !dns {
            return Ok(CertificateMeta::Http);
        }
        let text = |key: &str| match meta.get(key) {
            Some(Value::String(value)) => Ok(value.clone()),
            _ => Err(format!("DNS challenge meta requires string `{}`", key)),
        };
        let propagation_seconds = match meta.get("propagation_seconds") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                value
                    .as_u64()
                    .and_then(|seconds| u32::try_from(seconds).ok())
                    .ok_or_else(|| {
                        format!("propagation_seconds must be a non-negative integer, got {}", value)
                    })?,
            ),
        };
        Ok(CertificateMeta::Dns(DnsChallenge {
            dns_provider: text("dns_provider")?,
            dns_provider_credentials: text("dns_provider_credentials")?,
            propagation_seconds,
        }))
    }
}

impl Serialize for CertificateMeta {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CertificateMeta::Http => serializer.serialize_map(Some(0))?.end(),
            CertificateMeta::Dns(challenge) => {
                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("dns_challenge", &true)?;
                map.serialize_entry("dns_provider", &challenge.dns_provider)?;
                map.serialize_entry(
                    "dns_provider_credentials",
                    &challenge.dns_provider_credentials,
                )?;
                if let Some(seconds) = challenge.propagation_seconds {
                    map.serialize_entry("propagation_seconds", &seconds)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for CertificateMeta {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let meta = Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
        CertificateMeta::from_map(&meta).map_err(de::Error::custom)
    }
}

/// A certificate as returned by the API
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Certificate {
    pub id: u64,
    pub created_on: String,
    pub modified_on: String,
    pub owner_user_id: u64,
    #[serde(default)]
    pub provider: Provider,
    #[serde(default, deserialize_with = "null_as_default")]
    pub nice_name: String,
    pub domain_names: Vec<String>,
    #[serde(default)]
    pub expires_on: Option<String>,
    /// Kept as the raw object so nothing the server reports is lost on display
    #[serde(default, deserialize_with = "null_as_default")]
    pub meta: Map<String, Value>,
}

impl Resource for Certificate {
    type Write = CertificateWrite;
    type Patch = CertificateUpdate;

    const KIND: ResourceKind = ResourceKind::Certificate;

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

/// Body of `POST /api/nginx/certificates`
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CertificateWrite {
    #[serde(default)]
    pub provider: Provider,
    #[serde(default)]
    pub nice_name: String,
    pub domain_names: Vec<String>,
    pub meta: CertificateMeta,
}

impl CertificateWrite {
    /// A Let's Encrypt certificate validated through the HTTP challenge.
    pub fn letsencrypt(domain_names: Vec<String>) -> Self {
        CertificateWrite {
            provider: Provider::Letsencrypt,
            nice_name: String::new(),
            domain_names,
            meta: CertificateMeta::Http,
        }
    }
}

impl WritePayload for CertificateWrite {
    fn validate(&self) -> Result<(), String> {
        validate_domain_names(&self.domain_names)?;
        if let CertificateMeta::Dns(challenge) = &self.meta {
            if challenge.dns_provider.trim().is_empty() {
                return Err("dns_provider must not be empty".to_string());
            }
            if challenge.dns_provider_credentials.trim().is_empty() {
                return Err("dns_provider_credentials must not be empty".to_string());
            }
        }
        Ok(())
    }
}

/// Partial update of a certificate
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CertificateUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nice_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<CertificateMeta>,
}
