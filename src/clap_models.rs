use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::str::FromStr;

use crate::models::certificate::Provider;
use crate::models::proxy_host::{CertificateRef, ForwardScheme};
use crate::templates::{Template, DEFAULT_LAN_NETWORK, DEFAULT_VPN_NETWORK};

#[derive(Parser)]
#[clap(
author,
version,
about,
long_about = None
)]
#[clap(propagate_version = true)]
pub struct Cli {
    /// Path to JSON config file [default: ~/.npm-cli/config.json]
    #[clap(short, long, value_parser, global = true, env = "NPM_CLI_CONFIG")]
    pub config: Option<PathBuf>,

    /// Base URL of the NPM admin API, e.g. http://192.168.1.100:81
    #[clap(long, value_parser, global = true, env = "NPM_API_URL")]
    pub api_url: Option<String>,

    /// Name of the NPM Docker container used for discovery
    #[clap(long, value_parser, global = true, env = "NPM_CONTAINER_NAME")]
    pub container: Option<String>,

    /// NPM user (email)
    #[clap(long, value_parser, global = true, env = "NPM_USERNAME")]
    pub username: Option<String>,

    /// NPM password. Prefer NPM_PASSWORD, the flag is accepted but hidden from help
    #[clap(long, value_parser, hide = true, env = "NPM_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Enables or disables Docker discovery of the API URL
    #[clap(long, value_parser, hide = true, env = "NPM_USE_DOCKER_DISCOVERY")]
    pub docker_discovery: Option<bool>,

    /// Do not look for the NPM container through Docker
    #[clap(long = "no-docker", global = true, action = ArgAction::SetTrue)]
    pub no_docker: bool,

    /// Output format of results
    #[clap(short, long, value_enum, global = true, default_value_t = OutputFormat::Json)]
    pub output: OutputFormat,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Obtain a token with the configured credentials and cache it
    Login,

    /// Remove the cached token
    Logout,

    /// Show API URL and token state
    Status,

    /// Inspect the configuration
    Config {
        #[clap(subcommand)]
        config_command: ConfigCommands,
    },

    /// Manage proxy hosts
    Proxy {
        #[clap(subcommand)]
        proxy_command: ProxyCommands,
    },

    /// Manage SSL certificates
    Cert {
        #[clap(subcommand)]
        cert_command: CertCommands,
    },

    /// Print an nginx snippet for the "Advanced" tab of a proxy host
    Template(TemplateArgs),
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration, password redacted
    Show,
}

#[derive(Subcommand)]
pub enum ProxyCommands {
    /// List all proxy hosts
    List,

    /// Show a proxy host
    Show {
        /// Proxy host ID or one of its domains
        #[clap(value_parser, value_name = "ID|DOMAIN")]
        host: String,
    },

    /// Create a proxy host from flags or from a YAML/JSON file
    Create(ProxyCreateArgs),

    /// Change selected fields of a proxy host, keeping all others
    Update(ProxyUpdateArgs),

    /// Delete a proxy host
    Delete {
        /// Proxy host ID or one of its domains
        #[clap(value_parser, value_name = "ID|DOMAIN")]
        host: String,
    },

    /// Create a new proxy host with the settings of an existing one
    Clone {
        /// Proxy host to copy, ID or one of its domains
        #[clap(value_parser, value_name = "ID|DOMAIN")]
        source: String,

        /// Domain of the new proxy host, may be repeated
        #[clap(short, long = "domain", value_parser, required = true)]
        domains: Vec<String>,

        /// Do not request a new certificate even if the source has one
        #[clap(long = "no-ssl", action = ArgAction::SetTrue)]
        no_ssl: bool,
    },
}

#[derive(clap::Args)]
pub struct ProxyCreateArgs {
    /// Read the proxy host from a YAML or JSON file instead of flags
    #[clap(short, long, value_parser, value_name = "FILE", conflicts_with_all = &["domains", "forward-host", "forward-port"])]
    pub file: Option<PathBuf>,

    /// Domain served by the proxy host, may be repeated
    #[clap(short, long = "domain", value_parser, required_unless_present = "file")]
    pub domains: Vec<String>,

    /// Scheme used to reach the backend
    #[clap(long, value_parser = parse_scheme, default_value = "http")]
    pub forward_scheme: ForwardScheme,

    /// Hostname or IP of the backend
    #[clap(long, value_parser, required_unless_present = "file")]
    pub forward_host: Option<String>,

    /// Port of the backend
    #[clap(long, value_parser = clap::value_parser!(u16).range(1..), required_unless_present = "file")]
    pub forward_port: Option<u16>,

    /// Existing certificate to use
    #[clap(long, value_parser, value_name = "CERT_ID")]
    pub certificate: Option<u64>,

    /// Redirect HTTP to HTTPS
    #[clap(long, action = ArgAction::SetTrue)]
    pub ssl_forced: bool,

    /// Allow WebSocket upgrades
    #[clap(long, action = ArgAction::SetTrue)]
    pub websocket: bool,

    /// Enable asset caching
    #[clap(long, action = ArgAction::SetTrue)]
    pub caching: bool,

    /// File holding custom nginx configuration
    #[clap(long, value_parser, value_name = "FILE")]
    pub advanced_config: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct ProxyUpdateArgs {
    /// Proxy host ID or one of its domains
    #[clap(value_parser, value_name = "ID|DOMAIN")]
    pub host: String,

    /// Replace the domains, may be repeated
    #[clap(short, long = "domain", value_parser)]
    pub domains: Vec<String>,

    #[clap(long, value_parser = parse_scheme)]
    pub forward_scheme: Option<ForwardScheme>,

    #[clap(long, value_parser)]
    pub forward_host: Option<String>,

    #[clap(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub forward_port: Option<u16>,

    /// Certificate ID, `new` or `none`
    #[clap(long, value_parser = parse_certificate_ref, value_name = "CERT")]
    pub certificate: Option<CertificateRef>,

    #[clap(long, value_parser, value_name = "BOOL")]
    pub ssl_forced: Option<bool>,

    #[clap(long, value_parser, value_name = "BOOL")]
    pub hsts: Option<bool>,

    #[clap(long, value_parser, value_name = "BOOL")]
    pub hsts_subdomains: Option<bool>,

    #[clap(long, value_parser, value_name = "BOOL")]
    pub http2: Option<bool>,

    #[clap(long, value_parser, value_name = "BOOL")]
    pub block_exploits: Option<bool>,

    #[clap(long, value_parser, value_name = "BOOL")]
    pub caching: Option<bool>,

    #[clap(long, value_parser, value_name = "BOOL")]
    pub websocket: Option<bool>,

    #[clap(long, value_parser, value_name = "ID")]
    pub access_list: Option<u64>,

    /// File holding custom nginx configuration
    #[clap(long, value_parser, value_name = "FILE")]
    pub advanced_config: Option<PathBuf>,

    #[clap(long, value_parser, value_name = "BOOL")]
    pub enabled: Option<bool>,
}

#[derive(Subcommand)]
pub enum CertCommands {
    /// List all certificates
    List,

    /// Show a certificate
    Show {
        /// Certificate ID or one of its domains
        #[clap(value_parser, value_name = "ID|DOMAIN")]
        certificate: String,
    },

    /// Request a new certificate
    Create(CertCreateArgs),

    /// Delete a certificate that no proxy host uses
    Delete {
        #[clap(value_parser, value_name = "ID")]
        id: u64,

        /// Delete even if proxy hosts still use the certificate
        #[clap(long, action = ArgAction::SetTrue)]
        force: bool,
    },

    /// Attach a certificate to a proxy host and force SSL
    Attach {
        /// Proxy host ID or one of its domains
        #[clap(value_parser, value_name = "HOST")]
        host: String,

        /// Certificate ID or one of its domains
        #[clap(value_parser, value_name = "CERT")]
        certificate: String,

        /// Enable HSTS as well
        #[clap(long, action = ArgAction::SetTrue)]
        hsts: bool,
    },
}

#[derive(clap::Args)]
pub struct CertCreateArgs {
    /// Domain covered by the certificate, may be repeated
    #[clap(short, long = "domain", value_parser, required = true)]
    pub domains: Vec<String>,

    #[clap(long, value_parser = parse_provider, default_value = "letsencrypt")]
    pub provider: Provider,

    /// Display name
    #[clap(long, value_parser, default_value = "")]
    pub name: String,

    /// Use the DNS challenge with this provider, e.g. cloudflare
    #[clap(long, value_parser, requires = "dns-credentials")]
    pub dns_provider: Option<String>,

    /// File holding the DNS provider credentials
    #[clap(long, value_parser, value_name = "FILE", requires = "dns-provider")]
    pub dns_credentials: Option<PathBuf>,

    /// Seconds to wait for DNS propagation
    #[clap(long, value_parser, requires = "dns-provider")]
    pub propagation_seconds: Option<u32>,

    /// Attach the new certificate to this proxy host
    #[clap(long, value_parser, value_name = "HOST")]
    pub attach: Option<String>,

    /// Enable HSTS on the attached proxy host
    #[clap(long, action = ArgAction::SetTrue, requires = "attach")]
    pub hsts: bool,
}

#[derive(clap::Args)]
pub struct TemplateArgs {
    /// One of authentik, api-bypass, vpn-only, websocket, authentik-bypass
    #[clap(value_parser = parse_template)]
    pub name: Template,

    /// Backend the snippet proxies to, e.g. http://app:8000
    #[clap(short, long, value_parser)]
    pub backend: Option<String>,

    /// Location served without authentication, may be repeated
    #[clap(short, long = "path", value_parser)]
    pub paths: Vec<String>,

    /// Restrict access to the VPN and LAN networks
    #[clap(long, action = ArgAction::SetTrue)]
    pub vpn_only: bool,

    #[clap(long, value_parser, default_value = DEFAULT_VPN_NETWORK)]
    pub vpn_network: String,

    #[clap(long, value_parser, default_value = DEFAULT_LAN_NETWORK)]
    pub lan_network: String,
}

fn parse_scheme(value: &str) -> Result<ForwardScheme, String> {
    ForwardScheme::from_str(value).map_err(|_| format!("expected http or https, got {}", value))
}

fn parse_provider(value: &str) -> Result<Provider, String> {
    Provider::from_str(value).map_err(|_| format!("expected letsencrypt or other, got {}", value))
}

fn parse_template(value: &str) -> Result<Template, String> {
    Template::from_str(value).map_err(|_| {
        format!(
            "unknown template {}, expected one of authentik, api-bypass, vpn-only, websocket, authentik-bypass",
            value
        )
    })
}

fn parse_certificate_ref(value: &str) -> Result<CertificateRef, String> {
    match value {
        "none" => Ok(CertificateRef::None),
        "new" => Ok(CertificateRef::New),
        id => id
            .parse::<u64>()
            .map(|id| CertificateRef::from(Some(id)))
            .map_err(|_| format!("expected a certificate ID, new or none, got {}", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_update_flags() {
        let cli = Cli::parse_from([
            "npm-cli",
            "proxy",
            "update",
            "app.example.com",
            "--forward-port",
            "8080",
            "--ssl-forced",
            "true",
            "--certificate",
            "none",
        ]);
        match cli.command {
            Commands::Proxy {
                proxy_command: ProxyCommands::Update(args),
            } => {
                assert_eq!(args.host, "app.example.com");
                assert_eq!(args.forward_port, Some(8080));
                assert_eq!(args.ssl_forced, Some(true));
                assert_eq!(args.certificate, Some(CertificateRef::None));
                assert_eq!(args.enabled, None);
            }
            _ => panic!("expected proxy update"),
        }
    }

    #[test]
    fn parse_template_and_output() {
        let cli = Cli::parse_from([
            "npm-cli",
            "--output",
            "yaml",
            "template",
            "authentik-bypass",
            "--backend",
            "http://n8n:5678",
            "--path",
            "/api/",
            "--path",
            "/webhook/",
        ]);
        assert_eq!(cli.output, OutputFormat::Yaml);
        match cli.command {
            Commands::Template(args) => {
                assert_eq!(args.name, Template::AuthentikBypass);
                assert_eq!(args.paths.len(), 2);
                assert_eq!(args.vpn_network, DEFAULT_VPN_NETWORK);
            }
            _ => panic!("expected template"),
        }
        assert!(Cli::try_parse_from(["npm-cli", "template", "unknown"]).is_err());
    }

    #[test]
    fn proxy_create_file_excludes_target_flags() {
        let cli = Cli::try_parse_from([
            "npm-cli", "proxy", "create", "-d", "a.com", "--forward-host", "x", "--forward-port",
            "80",
        ])
        .unwrap();
        match cli.command {
            Commands::Proxy {
                proxy_command: ProxyCommands::Create(args),
            } => {
                assert_eq!(args.forward_host.as_deref(), Some("x"));
                assert_eq!(args.forward_port, Some(80));
                assert!(args.file.is_none());
            }
            _ => panic!("expected proxy create"),
        }

        assert!(Cli::try_parse_from(["npm-cli", "proxy", "create", "--file", "host.yaml"]).is_ok());
        assert!(Cli::try_parse_from([
            "npm-cli", "proxy", "create", "--file", "host.yaml", "--forward-host", "x",
        ])
        .is_err());
        assert!(Cli::try_parse_from(["npm-cli", "proxy", "create", "-d", "a.com"]).is_err());
    }

    #[test]
    fn cert_create_dns_flags_come_in_pairs() {
        assert!(Cli::try_parse_from(["npm-cli", "cert", "create", "-d", "a.com"]).is_ok());
        assert!(Cli::try_parse_from([
            "npm-cli", "cert", "create", "-d", "a.com", "--dns-provider", "cloudflare",
        ])
        .is_err());
        assert!(Cli::try_parse_from([
            "npm-cli", "cert", "create", "-d", "a.com", "--dns-credentials", "cf.ini",
        ])
        .is_err());
        assert!(Cli::try_parse_from([
            "npm-cli", "cert", "create", "-d", "a.com", "--dns-provider", "cloudflare",
            "--dns-credentials", "cf.ini", "--propagation-seconds", "30",
        ])
        .is_ok());
        assert!(Cli::try_parse_from(["npm-cli", "cert", "create", "-d", "a.com", "--hsts"]).is_err());
    }

    #[test]
    fn certificate_refs() {
        assert_eq!(parse_certificate_ref("12"), Ok(CertificateRef::Id(12)));
        assert_eq!(parse_certificate_ref("0"), Ok(CertificateRef::None));
        assert_eq!(parse_certificate_ref("new"), Ok(CertificateRef::New));
        assert!(parse_certificate_ref("abc").is_err());
    }
}
