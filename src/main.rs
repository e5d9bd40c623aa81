use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use markitdown_client::ConversionClient;
use markitdown_config::MarkitdownConfig;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "markitdown")]
#[command(about = "Convert documents to markdown through the Learnify markitdown relay", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ~/.learnify/markitdown.yaml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert one or more documents (http:, https:, file: or data: URIs)
    Convert {
        #[arg(required = true)]
        uris: Vec<String>,

        /// Write one .md file per input into this directory instead of stdout
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// List the tools the upstream server advertises
    Tools,

    /// Connect and report whether the handshake succeeds
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let config_path = cli.config.unwrap_or_else(MarkitdownConfig::default_config_path);
    let config = MarkitdownConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;

    let client = ConversionClient::connect(config).await?;
    let outcome = run(&client, cli.command).await;
    client.close().await;
    outcome
}

async fn run(client: &ConversionClient, command: Commands) -> Result<()> {
    client.wait_ready().await.context("markitdown session did not become ready")?;

    match command {
        Commands::Convert { uris, output } => convert(client, &uris, output.as_deref()).await,
        Commands::Tools => {
            for tool in client.list_tools().await? {
                println!("{}", tool.name);
                if !tool.description.is_empty() {
                    println!("    {}", tool.description);
                }
            }
            Ok(())
        }
        Commands::Check => {
            let endpoint = client.endpoint().await.unwrap_or_default();
            println!("Session ready at {}", endpoint);
            Ok(())
        }
    }
}

async fn convert(client: &ConversionClient, uris: &[String], output: Option<&Path>) -> Result<()> {
    if let Some(dir) = output {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {:?}", dir))?;
    }

    // Calls are correlated by id, so all documents can be in flight at once.
    let results = join_all(uris.iter().map(|uri| client.convert_to_markdown(uri))).await;

    let names = output_file_names(uris);
    let mut failures = 0;
    for ((uri, name), result) in uris.iter().zip(&names).zip(results) {
        match result {
            Ok(markdown) => match output {
                Some(dir) => {
                    let path = dir.join(name);
                    std::fs::write(&path, markdown)
                        .with_context(|| format!("Failed to write {:?}", path))?;
                    info!("Wrote {} to {:?}", uri, path);
                }
                None => println!("{}", markdown),
            },
            Err(e) => {
                error!("Failed to convert {}: {}", uri, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} conversions failed", failures, uris.len());
    }
    Ok(())
}

/// One output name per URI; clashes get `-2`, `-3`, ... before `.md`.
fn output_file_names(uris: &[String]) -> Vec<String> {
    let mut taken = HashSet::new();
    uris.iter()
        .map(|uri| {
            let name = output_file_name(uri);
            let stem = name.strip_suffix(".md").unwrap_or(&name).to_string();
            let mut candidate = name;
            let mut n = 2;
            while !taken.insert(candidate.clone()) {
                candidate = format!("{}-{}.md", stem, n);
                n += 1;
            }
            candidate
        })
        .collect()
}

/// `file:///docs/report.pdf` -> `report.md`
fn output_file_name(uri: &str) -> String {
    if uri.starts_with("data:") {
        return "document.md".to_string();
    }

    let without_query = uri.split(['?', '#']).next().unwrap_or(uri);
    let last = without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();

    let stem = match last.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => last,
    };

    if stem.is_empty() || stem.contains(':') {
        "document.md".to_string()
    } else {
        format!("{}.md", stem)
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose { "debug" } else { "info" };

    // stdout carries the converted markdown
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_file_name() {
        assert_eq!(output_file_name("file:///docs/report.pdf"), "report.md");
        assert_eq!(output_file_name("https://example.com/a/slides.pptx?dl=1"), "slides.md");
        assert_eq!(output_file_name("https://example.com/notes/"), "notes.md");
        assert_eq!(output_file_name("file:///tmp/.hidden"), ".hidden.md");
        assert_eq!(output_file_name("data:text/plain;base64,SGk="), "document.md");
    }

    #[test]
    fn test_output_file_names_do_not_collide() {
        let uris: Vec<String> = [
            "file:///a/report.pdf",
            "file:///b/report.pdf",
            "https://example.com/report.docx",
            "file:///c/report-2.pdf",
            "data:text/plain,hi",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        assert_eq!(
            output_file_names(&uris),
            vec!["report.md", "report-2.md", "report-3.md", "report-2-2.md", "document.md"]
        );
    }

    #[test]
    fn test_cli_parses_convert() {
        let cli = Cli::try_parse_from(["markitdown", "convert", "file:///a.pdf", "-o", "out"]).unwrap();
        match cli.command {
            Commands::Convert { uris, output } => {
                assert_eq!(uris, vec!["file:///a.pdf"]);
                assert_eq!(output, Some(PathBuf::from("out")));
            }
            _ => panic!("expected convert"),
        }
    }

    #[test]
    fn test_convert_requires_uri() {
        assert!(Cli::try_parse_from(["markitdown", "convert"]).is_err());
    }
}
