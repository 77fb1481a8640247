//! Finds the NPM container through the Docker API and derives the admin API URL.

use bollard::container::ListContainersOptions;
use bollard::models::{ContainerSummary, PortTypeEnum};
use bollard::Docker;
use log::debug;

/// Port of the NPM admin interface inside the container
pub const ADMIN_PORT: u16 = 81;

pub const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";
pub const COMPOSE_SERVICE_NAME: &str = "nginx-proxy-manager";
pub const COMMON_NAMES: &[&str] = &["nginx-proxy-manager", "npm"];

/// Connects to the local Docker daemon, or returns `None` when it is not reachable.
async fn connect() -> Option<Docker> {
    let docker = match Docker::connect_with_local_defaults() {
        Ok(docker) => docker,
        Err(e) => {
            debug!("Docker is not available: {}", e);
            return None;
        }
    };
    match docker.ping().await {
        Ok(_) => Some(docker),
        Err(e) => {
            debug!("Docker daemon is not responding: {}", e);
            None
        }
    }
}

/// Names of a container without the leading slash Docker reports.
fn names(container: &ContainerSummary) -> impl Iterator<Item = &str> {
    container
        .names
        .iter()
        .flatten()
        .map(|name| name.trim_start_matches('/'))
}

fn has_name(container: &ContainerSummary, wanted: &str) -> bool {
    names(container).any(|name| name == wanted)
}

fn is_compose_service(container: &ContainerSummary) -> bool {
    container
        .labels
        .as_ref()
        .and_then(|labels| labels.get(COMPOSE_SERVICE_LABEL))
        .map_or(false, |service| service == COMPOSE_SERVICE_NAME)
}

/// Picks the NPM container among the running ones.
///
/// Tried in order: the configured name, the compose service label, then the common names.
pub fn select_container<'a>(
    containers: &'a [ContainerSummary],
    configured_name: Option<&str>,
) -> Option<&'a ContainerSummary> {
    if let Some(wanted) = configured_name {
        if let Some(container) = containers.iter().find(|c| has_name(c, wanted)) {
            debug!("Found NPM container by configured name {}", wanted);
            return Some(container);
        }
        debug!("No running container named {}", wanted);
    }
    if let Some(container) = containers.iter().find(|c| is_compose_service(c)) {
        debug!("Found NPM container by compose label");
        return Some(container);
    }
    COMMON_NAMES
        .iter()
        .find_map(|wanted| containers.iter().find(|c| has_name(c, wanted)))
}

/// Admin API URL of an NPM container.
///
/// A published admin port is reached through the loopback interface, otherwise
/// the container's network address is used directly.
pub fn base_url_for(container: &ContainerSummary) -> Option<String> {
    let published = container.ports.iter().flatten().find_map(|port| {
        let tcp = matches!(port.typ, None | Some(PortTypeEnum::TCP));
        if port.private_port == ADMIN_PORT && tcp {
            port.public_port
        } else {
            None
        }
    });
    if let Some(host_port) = published {
        return Some(format!("http://127.0.0.1:{}", host_port));
    }

    let mut networks: Vec<_> = container
        .network_settings
        .as_ref()
        .and_then(|settings| settings.networks.as_ref())
        .map(|networks| networks.iter().collect())
        .unwrap_or_default();
    networks.sort_by(|a, b| a.0.cmp(b.0));
    networks
        .into_iter()
        .filter_map(|(_, endpoint)| endpoint.ip_address.as_deref())
        .find(|ip| !ip.is_empty())
        .map(|ip| format!("http://{}:{}", ip, ADMIN_PORT))
}

/// Resolves the admin API URL of the NPM container, if Docker can find one.
///
/// Docker being unavailable is not an error; the caller falls back to its configuration.
pub async fn discover_base_url(configured_name: Option<&str>) -> Option<String> {
    let docker = connect().await?;
    let options = ListContainersOptions::<String> {
        all: false,
        ..Default::default()
    };
    let containers = match docker.list_containers(Some(options)).await {
        Ok(containers) => containers,
        Err(e) => {
            debug!("Cannot list containers: {}", e);
            return None;
        }
    };
    let url = select_container(&containers, configured_name).and_then(base_url_for);
    debug!("Discovered NPM at {:?}", url);
    url
}
