mod demo;

use std::io::Write;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use strand_core::config::StrandConfig;
use strand_core::types::StreamChunk;

#[derive(Parser)]
#[command(name = "strand", version, about = "Composable flow execution engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "strand.toml", env = "STRAND_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the effective configuration
    Config,
    /// Run the built-in demo flow on a JSON object
    Demo {
        /// Flow input, e.g. '{"text": "hello world"}'
        #[arg(long, default_value = r#"{"text": "Strand runs steps in order and fans out in parallel"}"#)]
        input: String,
        /// Print streamed chunks as they arrive
        #[arg(long)]
        stream: bool,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "strand", &mut std::io::stdout());
        return Ok(());
    }

    let config = if cli.config.exists() {
        StrandConfig::load(&cli.config)?
    } else {
        StrandConfig::default()
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(config.log.with_target)
        .with_writer(std::io::stderr)
        .init();

    if !cli.config.exists() {
        info!(path = %cli.config.display(), "No config file found, using defaults");
    }

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Demo { input, stream } => {
            let input: serde_json::Value = serde_json::from_str(&input)?;
            run_demo(config, input, stream).await?;
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

async fn run_demo(config: StrandConfig, input: serde_json::Value, stream: bool) -> anyhow::Result<()> {
    let flow = demo::flow()?;
    flow.initialize(config.engine, demo::registries()?)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            warn!("Interrupted, cancelling flow");
            cancel.cancel();
        });
    }

    if stream {
        let callback = std::sync::Arc::new(|chunk: StreamChunk| {
            if let Err(e) = print_chunk(&mut std::io::stdout().lock(), &chunk) {
                warn!(error = %e, "Failed to write stream chunk");
            }
        });
        flow.execute_streaming(&cancel, input, callback).await?;
    } else {
        let ctx = flow.execute(&cancel, input).await?;
        println!("{}", serde_json::to_string_pretty(&ctx.to_json())?);
    }

    flow.shutdown();
    Ok(())
}

fn print_chunk(out: &mut impl Write, chunk: &StreamChunk) -> std::io::Result<()> {
    match (&chunk.step, chunk.done) {
        (_, true) => writeln!(out, "\n[done] {}", chunk.content),
        (Some(step), false) => writeln!(out, "[{step}] {}", chunk.content),
        (None, false) => writeln!(out, "{}", chunk.content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_print_chunk_labels_steps() {
        let mut out = Vec::new();
        print_chunk(&mut out, &StreamChunk::delta("hello").for_step("summary")).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "[summary] hello\n");
    }

    #[test]
    fn test_print_chunk_reports_write_errors() {
        let err = print_chunk(&mut ClosedPipe, &StreamChunk::delta("x")).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }
}
