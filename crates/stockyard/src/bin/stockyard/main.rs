mod cli;

use indexmap::IndexMap;
use stockyard::graph::Filter;
use stockyard::pallet::{self, Pallet};
use stockyard::warehouse::Warehouse;

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("STOCKYARD_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let command_result = match cli.command {
        cli::Command::Query(query_cli) => query(query_cli),
        cli::Command::Fetch(fetch_cli) => fetch(fetch_cli),
        cli::Command::Dev(dev_cli) => dev(dev_cli),
    };

    if let Err(e) = command_result {
        for error in e.chain() {
            eprintln!("{error}")
        }
        std::process::exit(1);
    }
}

pub fn query(cli: cli::QueryCommand) -> anyhow::Result<()> {
    let warehouse = Warehouse::load(&cli.warehouse.warehouse)?;
    let filter = parse_filter(&cli.terms)?;

    let matched = warehouse.query(&filter);
    tracing::info!(%filter, matched = matched.len(), "query evaluated");

    let address = |p: &Pallet| format!("{}/{}", p.kind(), p.full_name());
    if cli.output.positions {
        let view: IndexMap<_, _> = matched
            .iter()
            .map(|p| (address(p), p.with_positions()))
            .collect();
        output(&cli.output, &view)
    } else {
        let view: IndexMap<_, _> = matched.iter().map(|p| (address(p), *p)).collect();
        output(&cli.output, &view)
    }
}

pub fn fetch(cli: cli::FetchCommand) -> anyhow::Result<()> {
    let warehouse = Warehouse::load(&cli.warehouse.warehouse)?;
    let found = warehouse.fetch(&pallet::identity_filter(&cli.kind, &cli.name))?;

    if cli.output.positions {
        output(&cli.output, &found.with_positions())
    } else {
        output(&cli.output, &found)
    }
}

/// (stockyard-)developer utilities
///
/// A quick way to expose internal structures for debugging purposes
pub fn dev(cli: cli::DevCommand) -> anyhow::Result<()> {
    use cli::DevSubCommand::*;

    let warehouse = Warehouse::load(&cli.warehouse.warehouse)?;

    match cli.command {
        Pallets => {
            for pallet in warehouse.pallets() {
                println!("{}/{}", pallet.kind(), pallet.full_name());
            }
        }
        Graph => println!("{:#?}", warehouse.graph()),
    }

    Ok(())
}

fn parse_filter(terms: &[String]) -> anyhow::Result<Filter> {
    let mut filter = Filter::new();

    for term in terms {
        // `~=` must be tried first; every pattern term also contains `=`
        if let Some((key, pattern)) = term.split_once("~=") {
            filter = filter.key_matches(key, regex::Regex::new(pattern)?);
        } else if let Some((key, value)) = term.split_once('=') {
            filter = filter.key(key, value);
        } else {
            anyhow::bail!("filter term `{term}` is neither key=value nor key~=regexp");
        }
    }

    Ok(filter)
}

fn output<T: serde::Serialize>(output: &cli::OutputArgs, value: &T) -> anyhow::Result<()> {
    match output.format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), value)?,
        cli::OutputFormat::Json => serde_json::to_writer_pretty(std::io::stdout(), value)?,
    };

    Ok(())
}
