//! Command-line entry point: serve, one-off fetches, and cache building.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use mixer::{
    config::MixerConfig,
    logging::init_logging,
    partition::{load_triples, CacheBuilder, DEFAULT_PAGE_SIZE},
    server, Direction, FetchRequest, Fetcher,
};

#[derive(Parser, Debug)]
#[command(
    name = "mixer",
    version,
    about = "Graph property-value server",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(long, global = true, help = "Tracing filter, overrides the config file")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ConfigArg {
    #[arg(
        long,
        short = 'c',
        value_name = "FILE",
        env = "MIXER_CONFIG",
        help = "TOML configuration file"
    )]
    config: Option<PathBuf>,
}

impl ConfigArg {
    fn load(&self) -> Result<MixerConfig, Box<dyn Error>> {
        Ok(match &self.config {
            Some(path) => MixerConfig::load(path)?,
            None => MixerConfig::default(),
        })
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server.
    Serve {
        #[command(flatten)]
        config: ConfigArg,

        #[arg(long, help = "Listen address")]
        host: Option<String>,

        #[arg(long, help = "Listen port")]
        port: Option<u16>,
    },
    /// Fetch one page of property values and print it as JSON.
    Fetch {
        #[command(flatten)]
        config: ConfigArg,

        #[arg(long = "node", required = true, value_name = "DCID")]
        nodes: Vec<String>,

        #[arg(long = "property", required = true, value_name = "NAME")]
        properties: Vec<String>,

        #[arg(long, default_value = "out", value_parser = parse_direction)]
        direction: Direction,

        #[arg(long, default_value_t = 0, help = "Entries per key, 0 for the default")]
        limit: usize,

        #[arg(long, help = "Continuation token from a previous page")]
        token: Option<String>,
    },
    /// Page a JSON array of triples into an import group cache file.
    BuildCache {
        #[arg(long, value_name = "FILE")]
        input: PathBuf,

        #[arg(long, value_name = "FILE")]
        output: PathBuf,

        #[arg(long, help = "Import group name, defaults to the output file stem")]
        name: Option<String>,

        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,
    },
}

fn parse_direction(value: &str) -> Result<Direction, String> {
    value.parse().map_err(|err: mixer::MixerError| err.to_string())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, host, port } => {
            let mut config = config.load()?;
            init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level))?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            let fetcher = Fetcher::from_config(&config)?;
            server::serve(fetcher, &config.server).await?;
        }
        Command::Fetch {
            config,
            nodes,
            properties,
            direction,
            limit,
            token,
        } => {
            let config = config.load()?;
            init_logging(cli.log_level.as_deref().unwrap_or("warn"))?;
            let fetcher = Fetcher::from_config(&config)?;
            let mut request = FetchRequest::new(nodes, properties, direction).with_limit(limit);
            if let Some(token) = token {
                request = request.with_token(token);
            }
            let result = fetcher.fetch(&request).await?;
            let values: Vec<_> = result
                .merged
                .iter()
                .map(|(key, values)| {
                    serde_json::json!({
                        "node": key.node,
                        "property": key.property,
                        "type": key.neighbor_type,
                        "values": values,
                    })
                })
                .collect();
            let output = serde_json::json!({
                "data": values,
                "next_token": result.next_token,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::BuildCache {
            input,
            output,
            name,
            page_size,
        } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"))?;
            let name = match name {
                Some(name) => name,
                None => output
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .ok_or("cannot derive a group name from --output; pass --name")?,
            };
            let mut builder = CacheBuilder::new(name).with_page_size(page_size);
            builder.extend(load_triples(&input)?);
            let cache = builder.build()?;
            cache.save(&output)?;
            println!("wrote {} rows to {}", cache.row_count(), output.display());
        }
    }
    Ok(())
}
