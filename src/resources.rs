use crate::certificates::ensure_certificate_unused;
use crate::client::NpmClient;
use crate::errors::NpmError;
use crate::reconcile::reconcile_update;
use crate::resource::{Resource, ResourceKind, WritePayload};
use log::{debug, warn};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

/// Result of a lookup by domain name.
///
/// When several records share the domain, the first one in list order is
/// returned and the ids of the others are kept in `ambiguous_with`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lookup<R> {
    pub resource: R,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ambiguous_with: Vec<u64>,
}

impl<R> Lookup<R> {
    pub fn exact(resource: R) -> Self {
        Lookup {
            resource,
            ambiguous_with: Vec::new(),
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        !self.ambiguous_with.is_empty()
    }
}

/// Parses and validates a single record of a response.
fn parse_record<R: Resource>(value: Value, index: Option<usize>) -> Result<R, NpmError> {
    let name = match index {
        Some(i) => format!("{} record #{}", R::KIND, i),
        None => R::KIND.to_string(),
    };
    let record: R = serde_json::from_value(value)
        .map_err(|e| NpmError::schema_changed(format!("{}: {}", name, e)))?;
    record
        .validate()
        .map_err(|e| NpmError::schema_changed(format!("{}: {}", name, e)))?;
    Ok(record)
}

pub fn parse_list<R: Resource>(body: &str) -> Result<Vec<R>, NpmError> {
    let values: Vec<Value> = serde_json::from_str(body).map_err(|e| {
        NpmError::schema_changed(format!("expected a list of {}s: {}", R::KIND, e))
    })?;
    values
        .into_iter()
        .enumerate()
        .map(|(i, value)| parse_record(value, Some(i)))
        .collect()
}

pub fn parse_one<R: Resource>(body: &str) -> Result<R, NpmError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| NpmError::schema_changed(format!("{}: {}", R::KIND, e)))?;
    parse_record(value, None)
}

/// Lists all records of a kind.
///
/// # Performed API Request
///
/// ```
/// GET https://{npm}/api/nginx/{proxy-hosts|certificates}
/// ```
pub async fn list<R: Resource>(client: &NpmClient) -> Result<Vec<R>, NpmError> {
    let kind = R::KIND;
    let body = client
        .execute::<()>(
            Method::GET,
            kind.collection_path(),
            None,
            &format!("list {}s", kind),
            &format!("{}s", kind.title()),
        )
        .await?;
    parse_list(&body)
}

/// Retrieves one record by id.
///
/// # Performed API Request
///
/// ```
/// GET https://{npm}/api/nginx/{proxy-hosts|certificates}/{id}
/// ```
pub async fn get<R: Resource>(client: &NpmClient, id: u64) -> Result<R, NpmError> {
    let kind = R::KIND;
    let body = client
        .execute::<()>(
            Method::GET,
            &kind.item_path(id),
            None,
            &format!("get {} {}", kind, id),
            &format!("{} {}", kind.title(), id),
        )
        .await?;
    parse_one(&body)
}

/// Picks the record serving `domain` by exact match on `domain_names`.
pub fn find_by_domain_name<R: Resource>(records: Vec<R>, domain: &str) -> Option<Lookup<R>> {
    let mut matches = records
        .into_iter()
        .filter(|record| record.domain_names().iter().any(|d| d == domain));
    let first = matches.next()?;
    let ambiguous_with: Vec<u64> = matches.map(|record| record.id()).collect();
    if !ambiguous_with.is_empty() {
        warn!(
            "Domain {} matches several {}s, using {} (also {:?})",
            domain,
            R::KIND,
            first.id(),
            ambiguous_with
        );
    }
    Some(Lookup {
        resource: first,
        ambiguous_with,
    })
}

/// Resolves a positive numeric id or a domain name to a record.
///
/// # Arguments
///
/// * `client` - A reference to an NpmClient instance
/// * `key` - Either an id such as `7` or a domain such as `app.example.com`
pub async fn get_by_domain_name<R: Resource>(
    client: &NpmClient,
    key: &str,
) -> Result<Lookup<R>, NpmError> {
    let key = key.trim();
    if let Ok(id) = key.parse::<u64>() {
        if id > 0 {
            return Ok(Lookup::exact(get(client, id).await?));
        }
    }
    let records = list::<R>(client).await?;
    find_by_domain_name(records, key)
        .ok_or_else(|| NpmError::NotFound(format!("{} for domain {}", R::KIND.title(), key)))
}

/// Creates a record. The payload is validated before anything is sent.
///
/// # Performed API Request
///
/// ```
/// POST https://{npm}/api/nginx/{proxy-hosts|certificates}
/// ```
pub async fn create<R: Resource>(client: &NpmClient, payload: &R::Write) -> Result<R, NpmError> {
    let kind = R::KIND;
    payload.validate().map_err(NpmError::invalid_request)?;
    let body = client
        .execute(
            Method::POST,
            kind.collection_path(),
            Some(payload),
            &format!("create {}", kind),
            kind.title(),
        )
        .await?;
    let created: R = parse_one(&body)?;
    debug!("Created {} {}", kind, created.id());
    Ok(created)
}

/// Applies a partial update by fetching the record and replacing it as a whole.
///
/// # Performed API Requests
///
/// ```
/// GET https://{npm}/api/nginx/{proxy-hosts|certificates}/{id}
/// PUT https://{npm}/api/nginx/{proxy-hosts|certificates}/{id}
/// ```
pub async fn update<R: Resource>(
    client: &NpmClient,
    id: u64,
    patch: &R::Patch,
) -> Result<R, NpmError> {
    let kind = R::KIND;
    let current: R = get(client, id).await?;
    let payload = reconcile_update(&current, patch)?;
    let body = client
        .execute(
            Method::PUT,
            &kind.item_path(id),
            Some(&payload),
            &format!("update {} {}", kind, id),
            &format!("{} {}", kind.title(), id),
        )
        .await?;
    parse_one(&body)
}

/// Deletes a record. Certificates still referenced by a proxy host are kept.
///
/// # Performed API Request
///
/// ```
/// DELETE https://{npm}/api/nginx/{proxy-hosts|certificates}/{id}
/// ```
pub async fn delete<R: Resource>(client: &NpmClient, id: u64) -> Result<(), NpmError> {
    if R::KIND == ResourceKind::Certificate {
        ensure_certificate_unused(client, id).await?;
    }
    delete_unchecked::<R>(client, id).await
}

/// Deletes a record without looking for references to it.
pub async fn delete_unchecked<R: Resource>(client: &NpmClient, id: u64) -> Result<(), NpmError> {
    let kind = R::KIND;
    client
        .execute::<()>(
            Method::DELETE,
            &kind.item_path(id),
            None,
            &format!("delete {} {}", kind, id),
            &format!("{} {}", kind.title(), id),
        )
        .await?;
    debug!("Deleted {} {}", kind, id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::authenticated_client;
    use crate::models::certificate::Certificate;
    use crate::models::proxy_host::{ForwardScheme, ProxyHost, ProxyHostUpdate, ProxyHostWrite};
    use crate::models::tests::{read_fixture, read_json_from_file};
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_json, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn host_fixtures() -> Vec<Value> {
        read_json_from_file("test/test_proxy_hosts.json").unwrap()
    }

    #[tokio::test]
    async fn list_tolerates_unknown_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/nginx/proxy-hosts"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(read_fixture("test/test_proxy_hosts.json")),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = authenticated_client(&server.uri(), &dir);
        let hosts = list::<ProxyHost>(&client).await.unwrap();
        assert_eq!(hosts.iter().map(|h| h.id).collect::<Vec<_>>(), vec![7, 9]);
    }

    #[tokio::test]
    async fn list_names_the_record_missing_required_fields() {
        let mut records = host_fixtures();
        records[1].as_object_mut().unwrap().remove("domain_names");

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/nginx/proxy-hosts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&records))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = authenticated_client(&server.uri(), &dir);
        let error = list::<ProxyHost>(&client).await.unwrap_err();
        let message = error.to_string();
        assert!(message.starts_with("NPM API response schema changed"), "{}", message);
        assert!(message.contains("record #1"), "{}", message);
        assert!(message.contains("domain_names"), "{}", message);
    }

    #[tokio::test]
    async fn get_missing_record_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/nginx/certificates/999"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = authenticated_client(&server.uri(), &dir);
        let error = get::<Certificate>(&client, 999).await.unwrap_err();
        assert_eq!(error.to_string(), "Certificate 999 not found");
        assert_eq!(error.exit_code(), 5);
    }

    #[tokio::test]
    async fn lookup_by_id_or_domain() {
        let records = host_fixtures();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/nginx/proxy-hosts/9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&records[1]))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/nginx/proxy-hosts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&records))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = authenticated_client(&server.uri(), &dir);

        let by_id = get_by_domain_name::<ProxyHost>(&client, "9").await.unwrap();
        assert_eq!(by_id.resource.id, 9);

        let by_domain = get_by_domain_name::<ProxyHost>(&client, "metrics.example.com")
            .await
            .unwrap();
        assert_eq!(by_domain.resource.id, 9);
        assert!(!by_domain.is_ambiguous());

        let error = get_by_domain_name::<ProxyHost>(&client, "example.com")
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "Proxy host for domain example.com not found");
    }

    #[test]
    fn ambiguous_lookup_is_deterministic() {
        let mut records = host_fixtures();
        records[1]["domain_names"] = json!(["app.example.com"]);
        let mut third = records[0].clone();
        third["id"] = json!(12);
        records.push(third);
        let hosts: Vec<ProxyHost> = serde_json::from_value(Value::Array(records)).unwrap();

        for _ in 0..3 {
            let lookup = find_by_domain_name(hosts.clone(), "app.example.com").unwrap();
            assert_eq!(lookup.resource.id, 7);
            assert_eq!(lookup.ambiguous_with, vec![9, 12]);
            assert!(lookup.is_ambiguous());
        }
        assert!(find_by_domain_name(hosts, "other.example.com").is_none());
    }

    #[tokio::test]
    async fn update_sends_full_normalized_body() {
        let records = host_fixtures();
        let mut updated = records[0].clone();
        updated["forward_port"] = json!(9000);
        updated["ssl_forced"] = json!(true);
        updated["locations"] = json!([]);

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/nginx/proxy-hosts/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&records[0]))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/nginx/proxy-hosts/7"))
            .and(body_json(json!({
                "domain_names": ["app.example.com"],
                "forward_scheme": "http",
                "forward_host": "192.168.1.100",
                "forward_port": 9000,
                "certificate_id": 0,
                "ssl_forced": true,
                "hsts_enabled": false,
                "hsts_subdomains": false,
                "http2_support": true,
                "block_exploits": true,
                "caching_enabled": false,
                "allow_websocket_upgrade": false,
                "access_list_id": 0,
                "advanced_config": "",
                "enabled": true,
                "meta": {"letsencrypt_agree": false, "dns_challenge": false},
                "locations": []
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(&updated))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = authenticated_client(&server.uri(), &dir);
        let patch = ProxyHostUpdate {
            forward_port: Some(9000),
            ssl_forced: Some(true),
            ..Default::default()
        };
        let host = update::<ProxyHost>(&client, 7, &patch).await.unwrap();
        assert_eq!(host.forward_port, 9000);
        assert!(host.ssl_forced);
        assert_eq!(host.domain_names, vec!["app.example.com"]);
    }

    #[tokio::test]
    async fn update_passes_locations_through_unchanged() {
        let location = json!({
            "path": "/api",
            "forward_host": "api.local",
            "forward_port": 9000,
            "forward_path": "/v2",
            "id": 3
        });
        let mut record = host_fixtures()[0].clone();
        record["locations"] = json!([location.clone()]);
        let mut updated = record.clone();
        updated["ssl_forced"] = json!(true);

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/nginx/proxy-hosts/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&record))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/nginx/proxy-hosts/7"))
            .and(body_partial_json(json!({
                "ssl_forced": true,
                "locations": [location.clone()]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(&updated))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = authenticated_client(&server.uri(), &dir);
        let patch = ProxyHostUpdate {
            ssl_forced: Some(true),
            ..Default::default()
        };
        update::<ProxyHost>(&client, 7, &patch).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let put = requests
            .iter()
            .find(|request| request.method.as_str() == "PUT")
            .unwrap();
        let body: Value = serde_json::from_slice(&put.body).unwrap();
        assert_eq!(body["locations"], json!([location]));
    }

    #[tokio::test]
    async fn update_response_schema_drift_is_reported() {
        let records = host_fixtures();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/nginx/proxy-hosts/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&records[0]))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/nginx/proxy-hosts/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7})))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = authenticated_client(&server.uri(), &dir);
        let patch = ProxyHostUpdate {
            enabled: Some(false),
            ..Default::default()
        };
        let error = update::<ProxyHost>(&client, 7, &patch).await.unwrap_err();
        assert!(error
            .to_string()
            .starts_with("NPM API response schema changed"));
    }

    #[tokio::test]
    async fn invalid_create_payload_is_never_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = authenticated_client(&server.uri(), &dir);
        let payload = ProxyHostWrite::new(vec![], ForwardScheme::Http, "backend".to_string(), 80);
        let error = create::<ProxyHost>(&client, &payload).await.unwrap_err();
        assert_eq!(error.exit_code(), 6);
        assert!(error.to_string().starts_with("Invalid request"));
    }

    #[tokio::test]
    async fn create_posts_only_writable_fields() {
        let records = host_fixtures();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/nginx/proxy-hosts"))
            .and(body_json(json!({
                "domain_names": ["app.example.com"],
                "forward_scheme": "http",
                "forward_host": "192.168.1.100",
                "forward_port": 8080,
                "certificate_id": 0,
                "ssl_forced": false,
                "hsts_enabled": false,
                "hsts_subdomains": false,
                "http2_support": true,
                "block_exploits": true,
                "caching_enabled": false,
                "allow_websocket_upgrade": false,
                "access_list_id": 0,
                "advanced_config": "",
                "enabled": true,
                "meta": {},
                "locations": []
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(&records[0]))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = authenticated_client(&server.uri(), &dir);
        let payload = ProxyHostWrite::new(
            vec!["app.example.com".to_string()],
            ForwardScheme::Http,
            "192.168.1.100".to_string(),
            8080,
        );
        let host = create::<ProxyHost>(&client, &payload).await.unwrap();
        assert_eq!(host.id, 7);
    }

    #[tokio::test]
    async fn delete_proxy_host() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/nginx/proxy-hosts/7"))
            .respond_with(ResponseTemplate::new(200).set_body_string("true"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let client = authenticated_client(&server.uri(), &dir);
        delete::<ProxyHost>(&client, 7).await.unwrap();
    }
}
