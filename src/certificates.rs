use crate::client::NpmClient;
use crate::errors::NpmError;
use crate::models::certificate::{Certificate, CertificateWrite};
use crate::models::proxy_host::{CertificateRef, ProxyHost, ProxyHostUpdate};
use crate::resources;
use log::{debug, info};

/// Ids of the proxy hosts that reference the certificate.
///
/// # Arguments
///
/// * `client` - A reference to an NpmClient instance
/// * `certificate_id` - Id of the certificate in question
pub async fn hosts_using_certificate(
    client: &NpmClient,
    certificate_id: u64,
) -> Result<Vec<u64>, NpmError> {
    let hosts = resources::list::<ProxyHost>(client).await?;
    Ok(hosts
        .iter()
        .filter(|host| host.certificate() == Some(certificate_id))
        .map(|host| host.id)
        .collect())
}

/// Fails with a conflict if any proxy host still references the certificate.
///
/// NPM itself deletes referenced certificates without complaint and leaves the
/// hosts pointing at a missing certificate.
pub async fn ensure_certificate_unused(
    client: &NpmClient,
    certificate_id: u64,
) -> Result<(), NpmError> {
    let host_ids = hosts_using_certificate(client, certificate_id).await?;
    if host_ids.is_empty() {
        Ok(())
    } else {
        Err(NpmError::Conflict {
            certificate_id,
            host_ids,
        })
    }
}

/// Requests a new certificate.
pub async fn create_certificate(
    client: &NpmClient,
    payload: &CertificateWrite,
) -> Result<Certificate, NpmError> {
    let certificate = resources::create::<Certificate>(client, payload).await?;
    info!(
        "Created certificate {} for {}",
        certificate.id,
        certificate.domain_names.join(", ")
    );
    Ok(certificate)
}

/// Deletes a certificate. Unless `force` is set, referenced certificates are refused.
pub async fn delete_certificate(
    client: &NpmClient,
    certificate_id: u64,
    force: bool,
) -> Result<(), NpmError> {
    if force {
        debug!("Deleting certificate {} without reference check", certificate_id);
        resources::delete_unchecked::<Certificate>(client, certificate_id).await
    } else {
        resources::delete::<Certificate>(client, certificate_id).await
    }
}

/// Points a proxy host at a certificate and forces SSL.
///
/// # Arguments
///
/// * `client` - A reference to an NpmClient instance
/// * `host_id` - Id of the proxy host
/// * `certificate_id` - Id of an existing certificate
/// * `hsts` - Whether HSTS is switched on as well
pub async fn attach_certificate(
    client: &NpmClient,
    host_id: u64,
    certificate_id: u64,
    hsts: bool,
) -> Result<ProxyHost, NpmError> {
    resources::get::<Certificate>(client, certificate_id).await?;
    let patch = ProxyHostUpdate {
        certificate_id: Some(CertificateRef::Id(certificate_id)),
        ssl_forced: Some(true),
        hsts_enabled: if hsts { Some(true) } else { None },
        ..Default::default()
    };
    let host = resources::update::<ProxyHost>(client, host_id, &patch).await?;
    info!("Attached certificate {} to proxy host {}", certificate_id, host_id);
    Ok(host)
}

/// Creates a certificate and attaches it to a proxy host in one go.
pub async fn create_and_attach(
    client: &NpmClient,
    payload: &CertificateWrite,
    host_id: u64,
    hsts: bool,
) -> Result<(Certificate, ProxyHost), NpmError> {
    let certificate = create_certificate(client, payload).await?;
    let host = attach_certificate(client, host_id, certificate.id, hsts).await?;
    Ok((certificate, host))
}
