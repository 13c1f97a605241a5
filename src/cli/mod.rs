//! Command-line interface for MCPHub
//!
//! `serve` runs the hub; `validate` checks the settings document;
//! `export` prints the unexpanded document for round-tripping.

use crate::config::SettingsStore;
use crate::constants;
use crate::http::HubServer;
use crate::McpHubError;
use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;

/// Exit code: clean shutdown
pub const EXIT_OK: i32 = 0;
/// Exit code: fatal configuration error at startup
pub const EXIT_CONFIG: i32 = 1;
/// Exit code: port bind failure
pub const EXIT_BIND: i32 = 2;

fn build_cli() -> Command {
    let settings_arg = Arg::new("settings")
        .long("settings")
        .short('s')
        .value_name("PATH")
        .help("Path to mcp_settings.json (falls back to MCPHUB_SETTING_PATH, then CWD)");

    Command::new("mcphub")
        .about("Multiplexing gateway for Model Context Protocol servers")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(false)
        .subcommand(
            Command::new("serve")
                .about("Run the hub server")
                .arg(settings_arg.clone())
                .arg(
                    Arg::new("host")
                        .long("host")
                        .value_name("HOST")
                        .help("Host to bind to (default 0.0.0.0)"),
                )
                .arg(
                    Arg::new("port")
                        .long("port")
                        .short('p')
                        .value_name("PORT")
                        .help("Port to bind to (default $PORT or 3000)"),
                ),
        )
        .subcommand(
            Command::new("validate")
                .about("Parse and validate the settings document")
                .arg(settings_arg.clone()),
        )
        .subcommand(
            Command::new("export")
                .about("Print the settings document without environment expansion")
                .arg(settings_arg),
        )
}

fn settings_path(matches: &ArgMatches) -> Option<PathBuf> {
    matches.get_one::<String>("settings").map(PathBuf::from)
}

/// Run the CLI; the returned value is the process exit code.
pub async fn run() -> i32 {
    let matches = build_cli().get_matches();

    match matches.subcommand() {
        Some(("validate", sub)) => run_validate(settings_path(sub)),
        Some(("export", sub)) => run_export(settings_path(sub)),
        Some(("serve", sub)) => run_serve(sub.clone()).await,
        _ => run_serve(ArgMatches::default()).await,
    }
}

fn run_validate(path: Option<PathBuf>) -> i32 {
    match SettingsStore::discover(path) {
        Ok(store) => {
            let settings = store.settings();
            println!(
                "{} ok: {} servers, {} groups, {} users",
                store.path().display(),
                settings.mcp_servers.len(),
                settings.groups.len(),
                settings.users.len()
            );
            EXIT_OK
        }
        Err(error) => {
            eprintln!("Error: {}", error);
            EXIT_CONFIG
        }
    }
}

fn run_export(path: Option<PathBuf>) -> i32 {
    let result = SettingsStore::discover(path).and_then(|store| {
        let original = store.load_original()?;
        let rendered = serde_json::to_string_pretty(&original)?;
        println!("{}", rendered);
        Ok(())
    });
    match result {
        Ok(()) => EXIT_OK,
        Err(error) => {
            eprintln!("Error: {}", error);
            EXIT_CONFIG
        }
    }
}

async fn run_serve(matches: ArgMatches) -> i32 {
    let store = match SettingsStore::discover(
        matches
            .try_get_one::<String>("settings")
            .ok()
            .flatten()
            .map(PathBuf::from),
    ) {
        Ok(store) => Arc::new(store),
        Err(error) => {
            eprintln!("Error: {}", error);
            return EXIT_CONFIG;
        }
    };

    let host = matches
        .try_get_one::<String>("host")
        .ok()
        .flatten()
        .cloned()
        .unwrap_or_else(|| constants::DEFAULT_HOST.to_string());
    let port = matches
        .try_get_one::<String>("port")
        .ok()
        .flatten()
        .and_then(|p| p.parse::<u16>().ok())
        .or_else(|| {
            std::env::var(constants::ENV_PORT)
                .ok()
                .and_then(|p| p.parse::<u16>().ok())
        })
        .unwrap_or(constants::DEFAULT_HTTP_PORT);

    let server = match HubServer::new(store).await {
        Ok(server) => server,
        Err(error) => {
            eprintln!("Error: {}", error);
            return EXIT_CONFIG;
        }
    };

    match server.serve(&host, port).await {
        Ok(()) => EXIT_OK,
        Err(McpHubError::Io(error)) => {
            eprintln!("Error: failed to bind {}:{}: {}", host, port, error);
            EXIT_BIND
        }
        Err(error) => {
            eprintln!("Error: {}", error);
            EXIT_CONFIG
        }
    }
}
