//! `npm-cli` is a CLI for the [Nginx Proxy Manager](https://nginxproxymanager.com/) admin API.
//! It mainly uses `clap` and `reqwest` under the hood.
//!
//! The main logic for the application can be found in `clap_app.rs`. Partial updates are built
//! in `reconcile.rs`, since the API only accepts full replacement of a record.

mod auth;
mod certificates;
mod clap_app;
mod clap_models;
mod client;
mod config;
mod discovery;
mod errors;
mod models;
mod proxy_hosts;
mod reconcile;
mod resource;
mod resources;
mod templates;

use crate::clap_app::init_cli;
use std::process;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // enable logger
    env_logger::init();

    // Enable virtual terminal to correctly colorize output on Windows 10 machines
    #[cfg(target_os = "windows")]
    let _ = colored::control::set_virtual_terminal(true);

    let code = init_cli().await;
    process::exit(code);
}
