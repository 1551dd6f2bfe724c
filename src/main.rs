use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Clone git repositories over the smart HTTP protocol
#[derive(Parser, Debug)]
#[command(name = "git-smart-clone")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Clone a repository into a new directory
    Clone {
        /// Repository URL
        url: String,
        /// Destination directory (default: derived from the URL)
        directory: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("git_smart_clone={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match cli.command {
        Commands::Clone { url, directory } => {
            let directory = directory.unwrap_or_else(|| default_directory(&url));
            run_clone(&url, directory).await
        }
    };

    if let Err(err) = result {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

async fn run_clone(url: &str, directory: PathBuf) -> anyhow::Result<()> {
    std::fs::create_dir_all(&directory)?;
    git_smart_clone::clone(url, &directory).await?;
    println!("Repository cloned into {}.", directory.display());
    Ok(())
}

fn default_directory(url: &str) -> PathBuf {
    let name = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .trim_end_matches(".git");
    if name.is_empty() {
        PathBuf::from("repository")
    } else {
        PathBuf::from(name)
    }
}
