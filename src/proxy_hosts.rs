use crate::certificates::create_certificate;
use crate::client::NpmClient;
use crate::errors::NpmError;
use crate::models::certificate::CertificateWrite;
use crate::models::proxy_host::{validate_domain_names, CertificateRef, ProxyHost, ProxyHostWrite};
use crate::reconcile::project;
use crate::resources;
use log::info;
use serde_json::Value;

/// Builds the create payload for a copy of `source` serving `domain_names`.
///
/// With `certificate_id` set, the copy uses that certificate and keeps the
/// SSL and HSTS flags of the source. Otherwise a source certificate is not
/// carried over and the SSL and HSTS flags are switched off.
pub fn clone_payload(
    source: &ProxyHost,
    domain_names: Vec<String>,
    certificate_id: Option<u64>,
) -> Result<ProxyHostWrite, NpmError> {
    let mut fields = project(source)?;
    fields.insert(
        "domain_names".to_string(),
        Value::from(domain_names),
    );
    let mut payload: ProxyHostWrite = serde_json::from_value(Value::Object(fields))
        .map_err(|e| NpmError::invalid_request(format!("cannot copy proxy host {}: {}", source.id, e)))?;

    match certificate_id {
        Some(id) => payload.certificate_id = CertificateRef::Id(id),
        None => {
            payload.certificate_id = CertificateRef::None;
            if source.certificate().is_some() {
                payload.ssl_forced = false;
                payload.hsts_enabled = false;
                payload.hsts_subdomains = false;
            }
        }
    }
    Ok(payload)
}

/// Creates a proxy host with the settings of an existing one.
///
/// # Arguments
///
/// * `client` - A reference to an NpmClient instance
/// * `source` - Id or domain of the proxy host to copy
/// * `domain_names` - Domains of the new proxy host
/// * `provision_ssl` - Request a new Let's Encrypt certificate when the source has one
pub async fn clone_proxy_host(
    client: &NpmClient,
    source: &str,
    domain_names: Vec<String>,
    provision_ssl: bool,
) -> Result<ProxyHost, NpmError> {
    validate_domain_names(&domain_names).map_err(NpmError::invalid_request)?;
    let source = resources::get_by_domain_name::<ProxyHost>(client, source)
        .await?
        .resource;

    let certificate_id = if source.certificate().is_some() && provision_ssl {
        let certificate =
            create_certificate(client, &CertificateWrite::letsencrypt(domain_names.clone())).await?;
        Some(certificate.id)
    } else {
        None
    };

    let payload = clone_payload(&source, domain_names, certificate_id)?;
    let created = resources::create::<ProxyHost>(client, &payload).await?;
    info!("Cloned proxy host {} into {}", source.id, created.id);
    Ok(created)
}
