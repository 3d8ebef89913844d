use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use tfmerge::backend::terraform::TerraformBackend;
use tfmerge::config::{DEFAULT_CONFIG_FILE, TfmergeConfig};
use tfmerge::merge::{Source, merge_with_report};
use tfmerge::telemetry;

/// Merge Terraform state files into one
///
/// Resources from every STATE are moved, in the order given, into a single
/// state (seeded by --base when set) using `terraform state mv`. A resource
/// present in several states is kept once when every copy is identical; if
/// copies differ the merge fails and nothing is written.
///
/// The merged serial is the number of states merged (plus one with a base).
/// The lineage is kept from the base, or newly generated without one.
///
/// EXAMPLES:
///
///   tfmerge a.tfstate b.tfstate > merged.tfstate
///
///   tfmerge -b terraform.tfstate -o terraform.tfstate team-*.tfstate
#[derive(Parser, Debug)]
#[command(name = "tfmerge")]
#[command(version, about)]
struct Cli {
    /// State files to merge, in merge order
    #[arg(required = true, value_name = "STATE")]
    states: Vec<PathBuf>,

    /// Base state to merge into
    #[arg(short, long, value_name = "FILE")]
    base: Option<PathBuf>,

    /// Write the merged state here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Run terraform in this directory (providers must be initialized there)
    #[arg(long, value_name = "DIR")]
    chdir: Option<PathBuf>,

    /// Terraform binary to use
    #[arg(long, value_name = "PATH", env = "TFMERGE_TERRAFORM")]
    terraform: Option<PathBuf>,

    /// Config file (default: ./tfmerge.toml when present)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print a JSON merge report to stderr
    #[arg(long)]
    report: bool,

    /// Log progress to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let mut backend = TerraformBackend::from_config(&config)
        .context("Failed to prepare the terraform scratch directory")?;
    if let Some(dir) = &cli.chdir {
        backend = backend.with_working_dir(dir);
    }

    let base = cli
        .base
        .as_deref()
        .map(read_state)
        .transpose()?;
    let sources = cli
        .states
        .iter()
        .map(|path| Ok(Source::new(path.display().to_string(), read_state(path)?)))
        .collect::<Result<Vec<_>>>()?;

    let outcome = merge_with_report(&backend, base.as_deref(), &sources)?;

    if cli.report {
        let report = serde_json::to_string_pretty(&outcome.report)
            .context("Failed to encode merge report")?;
        eprintln!("{report}");
    }
    for src in &outcome.report.sources {
        for (family, count) in src.by_module_family() {
            let module = if family.is_empty() { "root module" } else { family.as_str() };
            tracing::info!(source = %src.label, module, count, "relocated");
        }
    }

    match &cli.output {
        Some(path) => std::fs::write(path, &outcome.state)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => std::io::stdout()
            .lock()
            .write_all(&outcome.state)
            .context("Failed to write merged state to stdout")?,
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<TfmergeConfig> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    if cli.config.is_some() && !path.exists() {
        anyhow::bail!("Config file {} does not exist", path.display());
    }
    let mut config = TfmergeConfig::load(&path)?;
    if let Some(bin) = &cli.terraform {
        config.terraform.binary.clone_from(bin);
    }
    Ok(config)
}

fn read_state(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read state file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory as _;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_flags() {
        let cli = Cli::try_parse_from([
            "tfmerge", "-b", "base.tfstate", "-o", "out.tfstate", "--chdir", "work", "a.tfstate",
            "b.tfstate",
        ])
        .unwrap();
        assert_eq!(cli.base, Some(PathBuf::from("base.tfstate")));
        assert_eq!(cli.output, Some(PathBuf::from("out.tfstate")));
        assert_eq!(cli.chdir, Some(PathBuf::from("work")));
        assert_eq!(cli.states.len(), 2);
    }

    #[test]
    fn requires_at_least_one_state() {
        assert!(Cli::try_parse_from(["tfmerge"]).is_err());
    }
}
