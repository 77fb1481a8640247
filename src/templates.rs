//! Nginx snippets for the "Advanced" tab of a proxy host.
//!
//! Every function here is pure. The CLI only prints the result.

use strum_macros::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

pub const DEFAULT_VPN_NETWORK: &str = "10.10.10.0/24";
pub const DEFAULT_LAN_NETWORK: &str = "192.168.7.0/24";
pub const AUTHENTIK_OUTPOST: &str = "http://authentik-server:9000/outpost.goauthentik.io";

/// Possible templates
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumString, IntoStaticStr, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Template {
    Authentik,
    ApiBypass,
    VpnOnly,
    Websocket,
    AuthentikBypass,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Template {0} needs a backend, e.g. --backend http://app:8000")]
    MissingBackend(Template),
    #[error("Template {0} needs at least one path, e.g. --path /api/")]
    MissingPaths(Template),
}

/// Networks allowed through when access is restricted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Networks {
    pub vpn: String,
    pub lan: String,
}

impl Default for Networks {
    fn default() -> Self {
        Networks {
            vpn: DEFAULT_VPN_NETWORK.to_string(),
            lan: DEFAULT_LAN_NETWORK.to_string(),
        }
    }
}

/// Variables a template is rendered with
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemplateVars {
    pub backend: Option<String>,
    pub paths: Vec<String>,
    pub vpn_only: bool,
    pub networks: Networks,
}

const WEBSOCKET_HEADERS: &str = "proxy_http_version 1.1;
proxy_set_header Upgrade $http_upgrade;
proxy_set_header Connection \"upgrade\";
";

fn indent(snippet: &str, prefix: &str) -> String {
    snippet
        .lines()
        .map(|line| {
            if line.is_empty() {
                "\n".to_string()
            } else {
                format!("{}{}\n", prefix, line)
            }
        })
        .collect()
}

fn network_acl(networks: &Networks) -> String {
    format!(
        "allow {};\nallow {};\ndeny all;\n",
        networks.vpn, networks.lan
    )
}

fn outpost_location() -> String {
    format!(
        "# Authentik outpost
location /outpost.goauthentik.io {{
    proxy_pass {};
    proxy_set_header Host $host;
    proxy_set_header X-Original-URL $scheme://$http_host$request_uri;
    add_header Set-Cookie $auth_cookie;
    auth_request_set $auth_cookie $upstream_http_set_cookie;
    proxy_pass_request_body off;
    proxy_set_header Content-Length \"\";
    internal;
}}

# Redirect to the Authentik login page when unauthenticated
location @goauthentik_proxy_signin {{
    internal;
    add_header Set-Cookie $auth_cookie;
    return 302 /outpost.goauthentik.io/start?rd=$request_uri;
}}
",
        AUTHENTIK_OUTPOST
    )
}

fn protected_location(backend: &str, networks: Option<&Networks>) -> String {
    let mut block = String::from("location / {\n");
    if let Some(networks) = networks {
        block.push_str(&indent(&network_acl(networks), "    "));
        block.push('\n');
    }
    block.push_str(&format!(
        "    auth_request /outpost.goauthentik.io/auth/nginx;
    error_page 401 = @goauthentik_proxy_signin;
    auth_request_set $auth_cookie $upstream_http_set_cookie;
    add_header Set-Cookie $auth_cookie;

    auth_request_set $authentik_username $upstream_http_x_authentik_username;
    auth_request_set $authentik_groups $upstream_http_x_authentik_groups;
    auth_request_set $authentik_email $upstream_http_x_authentik_email;
    auth_request_set $authentik_name $upstream_http_x_authentik_name;
    auth_request_set $authentik_uid $upstream_http_x_authentik_uid;

    proxy_set_header X-authentik-username $authentik_username;
    proxy_set_header X-authentik-groups $authentik_groups;
    proxy_set_header X-authentik-email $authentik_email;
    proxy_set_header X-authentik-name $authentik_name;
    proxy_set_header X-authentik-uid $authentik_uid;

    proxy_pass {};
}}
",
        backend
    ));
    block
}

/// Authentik forward authentication in front of `backend`.
pub fn authentik_forward_auth(backend: &str, vpn_only: bool, networks: &Networks) -> String {
    let acl = if vpn_only { Some(networks) } else { None };
    format!("{}\n{}", outpost_location(), protected_location(backend, acl))
}

/// Unauthenticated locations proxied straight to `backend`.
///
/// Paths are used verbatim, so regex locations such as `~ ^/webhook(-test)?/` work.
/// Blank paths are skipped.
pub fn api_webhook_bypass(backend: &str, paths: &[String]) -> String {
    paths
        .iter()
        .map(|path| path.trim())
        .filter(|path| !path.is_empty())
        .map(|path| {
            format!(
                "location {} {{\n{}    proxy_pass {};\n}}\n",
                path,
                indent(WEBSOCKET_HEADERS, "    "),
                backend
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Inline access restriction to the VPN and LAN networks.
pub fn vpn_only_access(networks: &Networks) -> String {
    network_acl(networks)
}

/// Inline WebSocket upgrade headers.
pub fn websocket_support() -> String {
    WEBSOCKET_HEADERS.to_string()
}

/// Bypass locations followed by Authentik protection of everything else.
///
/// Network restrictions apply to the protected location only.
pub fn authentik_with_bypass(
    backend: &str,
    bypass_paths: &[String],
    vpn_only: bool,
    networks: &Networks,
) -> String {
    format!(
        "# Unauthenticated paths\n{}\n{}",
        api_webhook_bypass(backend, bypass_paths),
        authentik_forward_auth(backend, vpn_only, networks)
    )
}

fn require_backend(template: Template, vars: &TemplateVars) -> Result<String, TemplateError> {
    match vars.backend.as_deref().map(str::trim) {
        Some(backend) if !backend.is_empty() => Ok(backend.to_string()),
        _ => Err(TemplateError::MissingBackend(template)),
    }
}

fn require_paths(template: Template, vars: &TemplateVars) -> Result<(), TemplateError> {
    if vars.paths.iter().all(|path| path.trim().is_empty()) {
        return Err(TemplateError::MissingPaths(template));
    }
    Ok(())
}

/// Renders `template` with `vars`.
pub fn render(template: Template, vars: &TemplateVars) -> Result<String, TemplateError> {
    match template {
        Template::Authentik => {
            let backend = require_backend(template, vars)?;
            Ok(authentik_forward_auth(&backend, vars.vpn_only, &vars.networks))
        }
        Template::ApiBypass => {
            let backend = require_backend(template, vars)?;
            require_paths(template, vars)?;
            Ok(api_webhook_bypass(&backend, &vars.paths))
        }
        Template::VpnOnly => Ok(vpn_only_access(&vars.networks)),
        Template::Websocket => Ok(websocket_support()),
        Template::AuthentikBypass => {
            let backend = require_backend(template, vars)?;
            require_paths(template, vars)?;
            Ok(authentik_with_bypass(
                &backend,
                &vars.paths,
                vars.vpn_only,
                &vars.networks,
            ))
        }
    }
}
