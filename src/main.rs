//! Quire - an incremental documentation builder.

use anyhow::{Context, Result, bail};
use clap::Parser;
use quire::{
    BuildReport, Builder, HtmlWriter, ProjectConfig, Writer,
    cli::{BuildArgs, Cli, Commands},
    log,
    utils::fs::remove_dir_all,
};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ProjectConfig::load(&cli).context("failed to load quire.toml")?;

    match &cli.command {
        Commands::Build { build_args } => {
            config.validate().context("invalid configuration")?;
            build(config, build_args).map(|_| ())
        }
        Commands::Clean => clean(&config),
    }
}

/// Pick the writer named by `build.builder` and run the requested build.
fn build(config: ProjectConfig, args: &BuildArgs) -> Result<BuildReport> {
    let writer: Box<dyn Writer> = match config.build.builder.as_str() {
        "html" => Box::new(HtmlWriter::new(&config)),
        other => bail!("unknown builder `{other}`"),
    };
    let mut builder = Builder::new(config, writer);

    let report = if args.all {
        builder.build_all()
    } else if !args.files.is_empty() {
        builder.build_specific(&args.files)
    } else {
        builder.build_update()
    };
    report.context("build failed")
}

fn clean(config: &ProjectConfig) -> Result<()> {
    for dir in [&config.build.output, &config.build.doctrees] {
        remove_dir_all(dir)?;
        log!("clean"; "removed {}", dir.display());
    }
    Ok(())
}
