//! `irct` - run world-module scenarios against a live IRC network

use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use irct_core::{
    HandleId, HarnessConfig, ScenarioRunner, ScenarioStatus, SuiteOptions, TcpConnector,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn cli() -> Command {
    let config_arg = Arg::new("config")
        .long("config")
        .short('c')
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Harness configuration (TOML)");

    Command::new("irct")
        .version(irct_core::VERSION)
        .about("Multi-server IRC world-module test harness")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON on stderr"),
        )
        .subcommand(
            Command::new("run")
                .about("Run world scenarios over TCP")
                .arg(config_arg.clone())
                .arg(
                    Arg::new("scenario")
                        .long("scenario")
                        .short('s')
                        .action(ArgAction::Append)
                        .help("Scenario to run (repeatable; default: all)"),
                )
                .arg(
                    Arg::new("acting")
                        .long("acting")
                        .value_parser(value_parser!(HandleId))
                        .help("Acting handle as nick@server (overrides the config)"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the report as JSON"),
                )
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .default_value("1")
                        .value_parser(value_parser!(usize))
                        .help("Scenarios running at once"),
                )
                .arg(
                    Arg::new("deadline-secs")
                        .long("deadline-secs")
                        .value_parser(value_parser!(u64))
                        .help("Hard cap on the whole suite"),
                )
                .arg(
                    Arg::new("connect-timeout-secs")
                        .long("connect-timeout-secs")
                        .default_value("10")
                        .value_parser(value_parser!(u64))
                        .help("TCP dial timeout"),
                ),
        )
        .subcommand(Command::new("list").about("List known scenarios"))
        .subcommand(
            Command::new("check-config")
                .about("Parse and validate a configuration file")
                .arg(config_arg),
        )
        .subcommand(
            Command::new("sample-config")
                .about("Print the stock three-server configuration")
                .arg(
                    Arg::new("host")
                        .long("host")
                        .default_value("127.0.0.1")
                        .help("Host every server listens on"),
                )
                .arg(
                    Arg::new("base-port")
                        .long("base-port")
                        .default_value("6900")
                        .value_parser(value_parser!(u16))
                        .help("Port of irc1; irc2 and irc3 follow"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(args: &ArgMatches) -> anyhow::Result<HarnessConfig> {
    let path = args
        .get_one::<PathBuf>("config")
        .context("--config is required")?;
    let config =
        HarnessConfig::load(path).with_context(|| format!("loading {}", path.display()))?;
    tracing::info!(config = %path.display(), servers = config.servers.len(), "configuration loaded");
    Ok(config)
}

async fn run(args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let mut config = load_config(args)?;
    if config.servers.is_empty() {
        bail!("configuration lists no servers");
    }
    if let Some(acting) = args.get_one::<HandleId>("acting") {
        config = config.with_acting(acting.clone());
        config.validate()?;
    }

    let names: Vec<String> = args
        .get_many::<String>("scenario")
        .map(|v| v.cloned().collect())
        .unwrap_or_default();
    let scenarios = irct_world::select(&names)?;

    let mut options = SuiteOptions::default()
        .with_concurrency(args.get_one::<usize>("concurrency").copied().unwrap_or(1));
    if let Some(secs) = args.get_one::<u64>("deadline-secs") {
        options = options.with_deadline(Duration::from_secs(*secs));
    }
    let connect_timeout = args
        .get_one::<u64>("connect-timeout-secs")
        .copied()
        .unwrap_or(10);

    tracing::info!(
        scenarios = scenarios.len(),
        concurrency = options.concurrency,
        acting = ?config.acting.as_ref().map(ToString::to_string),
        "running suite over tcp"
    );
    let connector = Arc::new(TcpConnector::new(Duration::from_secs(connect_timeout)));
    let runner = ScenarioRunner::from_config(connector, config);
    let report = runner.run_suite(scenarios, options).await;

    if args.get_flag("json") {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", report.generate_text());
    }
    tracing::info!(
        passed = report.passed(),
        failed = report.count(ScenarioStatus::Failed),
        skipped = report.count(ScenarioStatus::Skipped),
        "suite verdict"
    );
    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("run", args)) => run(args).await,
        Some(("list", _)) => {
            for scenario in irct_world::catalog() {
                println!("{:<24} {}", scenario.name(), scenario.description());
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(("check-config", args)) => {
            let config = load_config(args)?;
            println!(
                "ok: {} servers, {} clients, acting {}",
                config.servers.len(),
                config.servers.iter().map(|s| s.clients.len()).sum::<usize>(),
                config
                    .acting
                    .as_ref()
                    .map_or_else(|| "<none>".to_string(), ToString::to_string)
            );
            Ok(ExitCode::SUCCESS)
        }
        Some(("sample-config", args)) => {
            tracing::debug!("rendering stock configuration");
            let host = args
                .get_one::<String>("host")
                .map_or("127.0.0.1", String::as_str);
            let base_port = args.get_one::<u16>("base-port").copied().unwrap_or(6900);
            let config = HarnessConfig::three_server_network(host, base_port)?;
            print!("{}", config.to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
        _ => Ok(ExitCode::FAILURE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn run_parses_repeated_scenarios() {
        let matches = cli()
            .try_get_matches_from([
                "irct",
                "run",
                "--config",
                "irct.toml",
                "-s",
                "world_join_sync",
                "-s",
                "movement_sync",
                "--acting",
                "c2a@irc2.test.net",
                "--concurrency",
                "2",
            ])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        let names: Vec<_> = args.get_many::<String>("scenario").unwrap().collect();
        assert_eq!(names, ["world_join_sync", "movement_sync"]);
        assert_eq!(args.get_one::<HandleId>("acting").unwrap().nick, "c2a");
        assert_eq!(*args.get_one::<usize>("concurrency").unwrap(), 2);
    }

    #[test]
    fn sample_config_base_port_without_room_is_an_error() {
        let matches = cli()
            .try_get_matches_from(["irct", "sample-config", "--base-port", "65535"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        let base_port = *args.get_one::<u16>("base-port").unwrap();
        assert!(HarnessConfig::three_server_network("127.0.0.1", base_port).is_err());
    }

    #[test]
    fn bad_acting_handle_rejected() {
        let result = cli().try_get_matches_from(["irct", "run", "-c", "x.toml", "--acting", "nobody"]);
        assert!(result.is_err());
    }
}
