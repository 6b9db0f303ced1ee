//! nbpress CLI - static sites from Jupyter notebooks.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "nbpress")]
#[command(about = "Static site generator for Jupyter notebook blogs")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to site.toml config file
    #[arg(short, long, default_value = "site.toml", global = true)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the site (the default)
    Build(BuildArgs),
}

#[derive(Args, Debug, Default)]
pub struct BuildArgs {
    /// Rebuild on change and live-reload open pages
    #[arg(short, long)]
    pub watch: bool,

    /// Output directory (defaults to config or "build")
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Skip minification
    #[arg(long)]
    pub no_minify: bool,

    /// Live-reload port in watch mode
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Open the homepage after the first build
    #[arg(long)]
    pub open: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt().with_env_filter(filter).with_target(false).init();

    match cli.command.unwrap_or(Commands::Build(BuildArgs::default())) {
        Commands::Build(args) => {
            commands::build::run(&cli.config, args).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_build() {
        let cli = Cli::try_parse_from(["nbpress"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("site.toml"));
    }

    #[test]
    fn parses_build_flags() {
        let cli = Cli::try_parse_from([
            "nbpress",
            "build",
            "--watch",
            "--output",
            "public",
            "--no-minify",
            "--port",
            "4000",
            "--open",
            "--config",
            "blog/site.toml",
        ])
        .unwrap();

        let Some(Commands::Build(args)) = cli.command else {
            panic!("expected build");
        };
        assert!(args.watch);
        assert!(args.no_minify);
        assert!(args.open);
        assert_eq!(args.output, Some(PathBuf::from("public")));
        assert_eq!(args.port, Some(4000));
        assert_eq!(cli.config, PathBuf::from("blog/site.toml"));
    }
}
