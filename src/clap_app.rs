use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use log::debug;
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::auth::{login, TokenCache};
use crate::certificates;
use crate::clap_models::*;
use crate::client::NpmClient;
use crate::config::{resolve_base_url, NpmConfig, Overrides};
use crate::errors::{print_error, NpmError};
use crate::models::certificate::{Certificate, CertificateMeta, CertificateWrite, DnsChallenge};
use crate::models::proxy_host::{CertificateRef, ProxyHost, ProxyHostUpdate, ProxyHostWrite};
use crate::proxy_hosts::clone_proxy_host;
use crate::resource::Resource;
use crate::resources::{self, Lookup};
use crate::templates::{render, Networks, TemplateVars};

/// Parses the command line, runs the command and returns the process exit status.
pub async fn init_cli() -> i32 {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => 0,
        Err(error) => {
            print_error(&error);
            exit_code(&error)
        }
    }
}

fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<NpmError>()
        .map_or(1, NpmError::exit_code)
}

async fn run(cli: Cli) -> Result<()> {
    // Templates are rendered offline, so neither config nor API is needed.
    if let Commands::Template(args) = &cli.command {
        let vars = TemplateVars {
            backend: args.backend.clone(),
            paths: args.paths.clone(),
            vpn_only: args.vpn_only,
            networks: Networks {
                vpn: args.vpn_network.clone(),
                lan: args.lan_network.clone(),
            },
        };
        let snippet = render(args.name, &vars).map_err(NpmError::from)?;
        print!("{}", snippet);
        return Ok(());
    }

    let config = load_config(&cli)?;
    let tokens = TokenCache::default_location()?;

    match &cli.command {
        Commands::Config {
            config_command: ConfigCommands::Show,
        } => return print_output(&config.redacted(), cli.output),
        Commands::Logout => {
            tokens.clear()?;
            println!("{} Removed cached token {}", "✔".green(), tokens.path().display());
            return Ok(());
        }
        _ => {}
    }

    let base_url = resolve_base_url(&config).await?;
    debug!("Using NPM at {}", base_url);
    let client = NpmClient::new(&base_url, tokens, config.timeout())?
        .with_retry(config.retry_policy());

    match cli.command {
        Commands::Login => {
            let (username, password) = config.credentials().ok_or_else(|| {
                NpmError::Config(
                    "username and password are required, set NPM_USERNAME and NPM_PASSWORD"
                        .to_string(),
                )
            })?;
            let token = login(&client, username, password).await?;
            println!(
                "{} Logged in to {} as {}, token valid until {}",
                "✔".green(),
                base_url,
                username,
                token.expires
            );
        }
        Commands::Status => {
            let entry = client.tokens.load_entry();
            let status = Status {
                api_url: base_url.clone(),
                authenticated: client.tokens.load().is_some(),
                token_expires: entry.map(|e| e.expires),
            };
            print_output(&status, cli.output)?;
        }
        Commands::Proxy { proxy_command } => {
            ensure_token(&client, &config).await?;
            run_proxy_command(&client, proxy_command, cli.output).await?;
        }
        Commands::Cert { cert_command } => {
            ensure_token(&client, &config).await?;
            run_cert_command(&client, cert_command, cli.output).await?;
        }
        Commands::Config { .. } | Commands::Logout | Commands::Template(_) => {}
    }
    Ok(())
}

#[derive(Serialize)]
struct Status {
    api_url: String,
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_expires: Option<String>,
}

fn load_config(cli: &Cli) -> Result<NpmConfig> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => NpmConfig::default_path()
            .ok_or_else(|| NpmError::Config("cannot determine the home directory".to_string()))?,
    };
    let mut config = NpmConfig::from_file(&path)
        .with_context(|| format!("Loading configuration from {}", path.display()))?;
    config.apply(Overrides {
        api_url: cli.api_url.clone(),
        container_name: cli.container.clone(),
        username: cli.username.clone(),
        password: cli.password.clone(),
        use_docker_discovery: if cli.no_docker {
            Some(false)
        } else {
            cli.docker_discovery
        },
    });
    config.validate()?;
    Ok(config)
}

/// Logs in when no valid token is cached and credentials are configured.
async fn ensure_token(client: &NpmClient, config: &NpmConfig) -> Result<()> {
    if client.tokens.load().is_some() {
        return Ok(());
    }
    if let Some((username, password)) = config.credentials() {
        debug!("No valid token cached, logging in as {}", username);
        login(client, username, password).await?;
    }
    Ok(())
}

fn print_output<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    let text = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    };
    println!("{}", text.trim_end());
    Ok(())
}

fn read_file(path: &Path, what: &str) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|source| NpmError::Io {
            path: path.to_path_buf(),
            source,
        })
        .with_context(|| format!("Reading {}", what))
}

fn warn_if_ambiguous<R: Resource>(lookup: &Lookup<R>, key: &str) {
    if lookup.is_ambiguous() {
        let others: Vec<String> = lookup.ambiguous_with.iter().map(|id| id.to_string()).collect();
        eprintln!(
            "{:>4} {}",
            "⚠".yellow(),
            format!(
                "{} matches several {}s, using {} (also {})",
                key,
                R::KIND,
                lookup.resource.id(),
                others.join(", ")
            )
            .yellow()
        );
    }
}

async fn resolve<R: Resource>(client: &NpmClient, key: &str) -> Result<R> {
    let lookup = resources::get_by_domain_name::<R>(client, key).await?;
    warn_if_ambiguous(&lookup, key);
    Ok(lookup.resource)
}

async fn run_proxy_command(
    client: &NpmClient,
    command: ProxyCommands,
    output: OutputFormat,
) -> Result<()> {
    match command {
        ProxyCommands::List => {
            let hosts = resources::list::<ProxyHost>(client).await?;
            print_output(&hosts, output)?;
        }
        ProxyCommands::Show { host } => {
            let host = resolve::<ProxyHost>(client, &host).await?;
            print_output(&host, output)?;
        }
        ProxyCommands::Create(args) => {
            let payload = proxy_create_payload(args)?;
            let host = resources::create::<ProxyHost>(client, &payload).await?;
            eprintln!("{} Created proxy host {}", "✔".green(), host.id);
            print_output(&host, output)?;
        }
        ProxyCommands::Update(args) => {
            let target = resolve::<ProxyHost>(client, &args.host).await?;
            let patch = proxy_update_patch(&args)?;
            if patch.is_empty() {
                return Err(NpmError::invalid_request(
                    "nothing to update, pass at least one field flag",
                )
                .into());
            }
            let host = resources::update::<ProxyHost>(client, target.id, &patch).await?;
            eprintln!("{} Updated proxy host {}", "✔".green(), host.id);
            print_output(&host, output)?;
        }
        ProxyCommands::Delete { host } => {
            let target = resolve::<ProxyHost>(client, &host).await?;
            resources::delete::<ProxyHost>(client, target.id).await?;
            println!(
                "{} Deleted proxy host {} ({})",
                "✔".green(),
                target.id,
                target.domain_names.join(", ")
            );
        }
        ProxyCommands::Clone {
            source,
            domains,
            no_ssl,
        } => {
            let host = clone_proxy_host(client, &source, domains, !no_ssl).await?;
            eprintln!("{} Created proxy host {}", "✔".green(), host.id);
            print_output(&host, output)?;
        }
    }
    Ok(())
}

fn proxy_create_payload(args: ProxyCreateArgs) -> Result<ProxyHostWrite> {
    if let Some(file) = &args.file {
        let content = read_file(file, "proxy host definition")?;
        let payload: ProxyHostWrite = serde_yaml::from_str(&content)
            .map_err(|e| NpmError::invalid_request(format!("{}: {}", file.display(), e)))?;
        return Ok(payload);
    }

    let (forward_host, forward_port) = match (args.forward_host, args.forward_port) {
        (Some(host), Some(port)) => (host, port),
        _ => {
            return Err(
                NpmError::invalid_request("--forward-host and --forward-port are required").into(),
            )
        }
    };
    let mut payload =
        ProxyHostWrite::new(args.domains, args.forward_scheme, forward_host, forward_port);
    payload.certificate_id = CertificateRef::from(args.certificate);
    payload.ssl_forced = args.ssl_forced;
    payload.allow_websocket_upgrade = args.websocket;
    payload.caching_enabled = args.caching;
    if let Some(path) = &args.advanced_config {
        payload.advanced_config = read_file(path, "advanced configuration")?;
    }
    Ok(payload)
}

fn proxy_update_patch(args: &ProxyUpdateArgs) -> Result<ProxyHostUpdate> {
    let advanced_config = match &args.advanced_config {
        Some(path) => Some(read_file(path, "advanced configuration")?),
        None => None,
    };
    Ok(ProxyHostUpdate {
        domain_names: if args.domains.is_empty() {
            None
        } else {
            Some(args.domains.clone())
        },
        forward_scheme: args.forward_scheme,
        forward_host: args.forward_host.clone(),
        forward_port: args.forward_port,
        certificate_id: args.certificate,
        ssl_forced: args.ssl_forced,
        hsts_enabled: args.hsts,
        hsts_subdomains: args.hsts_subdomains,
        http2_support: args.http2,
        block_exploits: args.block_exploits,
        caching_enabled: args.caching,
        allow_websocket_upgrade: args.websocket,
        access_list_id: args.access_list,
        advanced_config,
        enabled: args.enabled,
    })
}

async fn run_cert_command(
    client: &NpmClient,
    command: CertCommands,
    output: OutputFormat,
) -> Result<()> {
    match command {
        CertCommands::List => {
            let certificates = resources::list::<Certificate>(client).await?;
            print_output(&certificates, output)?;
        }
        CertCommands::Show { certificate } => {
            let certificate = resolve::<Certificate>(client, &certificate).await?;
            print_output(&certificate, output)?;
        }
        CertCommands::Create(args) => {
            let payload = certificate_payload(&args)?;
            match &args.attach {
                Some(host) => {
                    let target = resolve::<ProxyHost>(client, host).await?;
                    let (certificate, host) =
                        certificates::create_and_attach(client, &payload, target.id, args.hsts)
                            .await?;
                    eprintln!(
                        "{} Created certificate {} and attached it to proxy host {}",
                        "✔".green(),
                        certificate.id,
                        host.id
                    );
                    print_output(&certificate, output)?;
                }
                None => {
                    let certificate = certificates::create_certificate(client, &payload).await?;
                    eprintln!("{} Created certificate {}", "✔".green(), certificate.id);
                    print_output(&certificate, output)?;
                }
            }
        }
        CertCommands::Delete { id, force } => {
            certificates::delete_certificate(client, id, force).await?;
            println!("{} Deleted certificate {}", "✔".green(), id);
        }
        CertCommands::Attach {
            host,
            certificate,
            hsts,
        } => {
            let target = resolve::<ProxyHost>(client, &host).await?;
            let certificate = resolve::<Certificate>(client, &certificate).await?;
            let host =
                certificates::attach_certificate(client, target.id, certificate.id, hsts).await?;
            eprintln!(
                "{} Attached certificate {} to proxy host {}",
                "✔".green(),
                certificate.id,
                host.id
            );
            print_output(&host, output)?;
        }
    }
    Ok(())
}

fn certificate_payload(args: &CertCreateArgs) -> Result<CertificateWrite> {
    let meta = match (&args.dns_provider, &args.dns_credentials) {
        (Some(provider), Some(credentials)) => CertificateMeta::Dns(DnsChallenge {
            dns_provider: provider.clone(),
            dns_provider_credentials: read_credentials(credentials)?,
            propagation_seconds: args.propagation_seconds,
        }),
        (None, None) => CertificateMeta::Http,
        _ => {
            return Err(NpmError::invalid_request(
                "the DNS challenge needs both --dns-provider and --dns-credentials",
            )
            .into())
        }
    };
    Ok(CertificateWrite {
        provider: args.provider,
        nice_name: args.name.clone(),
        domain_names: args.domains.clone(),
        meta,
    })
}

fn read_credentials(path: &Path) -> Result<String> {
    Ok(read_file(path, "DNS provider credentials")?.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::certificate::Provider;
    use crate::models::proxy_host::ForwardScheme;
    use anyhow::anyhow;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn exit_codes_follow_error_kind() {
        let error = anyhow!(NpmError::NotFound("Proxy host 7".to_string()));
        assert_eq!(exit_code(&error), 5);

        let wrapped = Err::<(), _>(NpmError::Config("bad".to_string()))
            .context("Loading configuration")
            .unwrap_err();
        assert_eq!(exit_code(&wrapped), 2);

        assert_eq!(exit_code(&anyhow!("plain")), 1);
    }

    #[test]
    fn update_patch_only_sets_given_flags() {
        let args = ProxyUpdateArgs {
            host: "7".to_string(),
            domains: vec![],
            forward_scheme: None,
            forward_host: None,
            forward_port: Some(8080),
            certificate: None,
            ssl_forced: Some(true),
            hsts: None,
            hsts_subdomains: None,
            http2: None,
            block_exploits: None,
            caching: None,
            websocket: None,
            access_list: None,
            advanced_config: None,
            enabled: None,
        };
        let patch = proxy_update_patch(&args).unwrap();
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            serde_json::json!({"forward_port": 8080, "ssl_forced": true})
        );
    }

    #[test]
    fn create_payload_from_yaml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("host.yaml");
        fs::write(
            &path,
            "domain_names: [app.example.com]\nforward_scheme: https\nforward_host: app\nforward_port: 8443\n",
        )
        .unwrap();
        let args = ProxyCreateArgs {
            file: Some(path),
            domains: vec![],
            forward_scheme: ForwardScheme::Http,
            forward_host: None,
            forward_port: None,
            certificate: None,
            ssl_forced: false,
            websocket: false,
            caching: false,
            advanced_config: None,
        };
        let payload = proxy_create_payload(args).unwrap();
        assert_eq!(payload.forward_scheme, ForwardScheme::Https);
        assert_eq!(payload.forward_port, 8443);
        assert!(payload.block_exploits);
    }

    #[test]
    fn dns_certificate_reads_credentials_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cloudflare.ini");
        fs::write(&path, "dns_cloudflare_api_token = SECRET\n").unwrap();
        let args = CertCreateArgs {
            domains: vec!["*.example.com".to_string()],
            provider: Provider::Letsencrypt,
            name: String::new(),
            dns_provider: Some("cloudflare".to_string()),
            dns_credentials: Some(path),
            propagation_seconds: Some(60),
            attach: None,
            hsts: false,
        };
        let payload = certificate_payload(&args).unwrap();
        match payload.meta {
            CertificateMeta::Dns(challenge) => {
                assert_eq!(challenge.dns_provider_credentials, "dns_cloudflare_api_token = SECRET");
                assert_eq!(challenge.propagation_seconds, Some(60));
            }
            other => panic!("expected DNS challenge, got {:?}", other),
        }
    }

    #[test]
    fn dns_provider_without_credentials_is_rejected() {
        let args = CertCreateArgs {
            domains: vec!["*.example.com".to_string()],
            provider: Provider::Letsencrypt,
            name: String::new(),
            dns_provider: Some("cloudflare".to_string()),
            dns_credentials: None,
            propagation_seconds: None,
            attach: None,
            hsts: false,
        };
        let error = certificate_payload(&args).unwrap_err();
        assert_eq!(exit_code(&error), 6);
        assert!(error.to_string().contains("--dns-credentials"));
    }

    #[test]
    fn missing_credentials_file_is_an_io_error() {
        let error = read_credentials(&PathBuf::from("/nonexistent/credentials.ini")).unwrap_err();
        assert_eq!(exit_code(&error), 2);
        assert!(error.to_string().contains("DNS provider credentials"));
    }
}
