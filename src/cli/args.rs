//! Command-line argument parsing

use crate::config::RegistryKind;
use crate::error::{RegistryError, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "image-tag-crawler")]
#[command(about = "Find the newest release tag of container images as of past dates")]
#[command(version, author)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    #[arg(
        long = "verbose",
        short = 'v',
        global = true,
        help = "Enable verbose output"
    )]
    pub verbose: bool,

    /// Quiet mode
    #[arg(
        long = "quiet",
        short = 'q',
        global = true,
        help = "Only print errors and results"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List all tags for a repository
    ListTags(ListTagsArgs),
    /// List repositories under a namespace
    ListRepos(ListReposArgs),
    /// Find the tag that was newest at several past dates
    FindHistorical(FindHistoricalArgs),
    /// Resolve historical versions for every mapping in a file
    Resolve(ResolveArgs),
}

/// Which registry to talk to and how fast
#[derive(clap::Args, Debug, Clone)]
pub struct RegistryArgs {
    #[arg(
        long = "registry",
        default_value = "docker",
        help = "Registry type: docker, mcr, chainguard, oci"
    )]
    pub registry: RegistryKind,

    #[arg(
        long = "registry-url",
        help = "Registry base URL (required for --registry oci, overrides the preset otherwise)"
    )]
    pub registry_url: Option<String>,

    #[arg(
        long = "rate-limit",
        default_value = "1.0",
        help = "Minimum delay between requests in seconds"
    )]
    pub rate_limit: f64,

    #[arg(
        long = "timeout",
        default_value = "30",
        help = "Timeout for each request in seconds"
    )]
    pub timeout: u64,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ListTagsArgs {
    #[arg(help = "Repository name (e.g. python, dotnet/runtime)")]
    pub repository: String,

    #[command(flatten)]
    pub registry: RegistryArgs,

    #[arg(long = "namespace", help = "Repository namespace")]
    pub namespace: Option<String>,

    #[arg(long = "pattern", help = "Tag pattern (regex) to filter")]
    pub pattern: Option<String>,

    #[arg(long = "only-semver", help = "Only show semantic version tags")]
    pub only_semver: bool,

    #[arg(long = "exclude-dev", help = "Exclude dev/preview tags")]
    pub exclude_dev: bool,

    #[arg(long = "filter", help = "Apply filters (pattern, semver, dev)")]
    pub filter: bool,

    #[arg(long = "sort-by-date", help = "Sort by creation date (newest first)")]
    pub sort_by_date: bool,

    #[arg(
        long = "output-format",
        default_value = "csv",
        help = "Output format: csv, json"
    )]
    pub output_format: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ListReposArgs {
    #[command(flatten)]
    pub registry: RegistryArgs,

    #[arg(
        long = "namespace",
        help = "Namespace to list (defaults to the registry's own, e.g. library)"
    )]
    pub namespace: Option<String>,

    #[arg(
        long = "limit",
        default_value = "100",
        help = "Maximum number of repositories"
    )]
    pub limit: usize,

    #[arg(
        long = "output-format",
        default_value = "text",
        help = "Output format: text, json"
    )]
    pub output_format: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct FindHistoricalArgs {
    #[arg(help = "Repository name")]
    pub repository: String,

    #[command(flatten)]
    pub registry: RegistryArgs,

    #[arg(long = "namespace", help = "Repository namespace")]
    pub namespace: Option<String>,

    #[arg(long = "pattern", help = "Tag pattern (regex) to filter")]
    pub pattern: Option<String>,

    #[arg(long = "include-dev", help = "Consider dev/preview tags too")]
    pub include_dev: bool,

    #[arg(long = "any-name", help = "Consider tags that are not semantic versions")]
    pub any_name: bool,

    #[arg(
        long = "periods",
        help = r#"JSON array of periods, e.g. [{"name":"current","offset_days":0}]"#
    )]
    pub periods: Option<String>,

    #[arg(
        long = "output-format",
        default_value = "table",
        help = "Output format: table, json"
    )]
    pub output_format: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ResolveArgs {
    #[arg(long = "mappings", help = "Input mappings YAML file")]
    pub mappings: PathBuf,

    #[arg(long = "output", help = "Output file with historical versions")]
    pub output: PathBuf,

    #[arg(
        long = "workers",
        default_value = "5",
        help = "Number of parallel workers (1 for sequential)"
    )]
    pub workers: usize,

    #[arg(
        long = "rate-limit",
        default_value = "1.0",
        help = "Minimum delay between requests in seconds"
    )]
    pub rate_limit: f64,

    #[arg(
        long = "oci-url",
        help = "Base URL used for mappings whose registry is 'oci'"
    )]
    pub oci_url: Option<String>,

    #[arg(
        long = "periods",
        help = "JSON array of periods, overriding the mappings file"
    )]
    pub periods: Option<String>,

    #[arg(
        long = "output-format",
        default_value = "yaml",
        help = "Output format: yaml, json"
    )]
    pub output_format: String,
}

/// Longest pause between requests we accept, in seconds
pub const MAX_RATE_LIMIT: f64 = 3600.0;

/// `--rate-limit` seconds as a request spacing
pub fn rate_limit_delay(rate_limit: f64) -> Result<Duration> {
    if rate_limit > MAX_RATE_LIMIT {
        return Err(RegistryError::Validation(format!(
            "Rate limit must be at most {} seconds, got {}",
            MAX_RATE_LIMIT, rate_limit
        )));
    }
    Duration::try_from_secs_f64(rate_limit).map_err(|_| {
        RegistryError::Validation(format!(
            "Rate limit must be a non-negative number of seconds, got {}",
            rate_limit
        ))
    })
}

fn validate_rate_limit(rate_limit: f64) -> Result<()> {
    rate_limit_delay(rate_limit).map(|_| ())
}

fn validate_format(format: &str, allowed: &[&str]) -> Result<()> {
    if allowed.contains(&format) {
        Ok(())
    } else {
        Err(RegistryError::Validation(format!(
            "Output format must be one of: {}",
            allowed.join(", ")
        )))
    }
}

impl RegistryArgs {
    pub fn validate(&self) -> Result<()> {
        validate_rate_limit(self.rate_limit)?;
        if self.timeout == 0 {
            return Err(RegistryError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }
        if self.registry == RegistryKind::Oci && self.registry_url.is_none() {
            return Err(RegistryError::Validation(
                "--registry oci requires --registry-url".to_string(),
            ));
        }
        Ok(())
    }
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    /// Checks clap cannot express
    pub fn validate(&self) -> Result<()> {
        match &self.command {
            Command::ListTags(args) => {
                args.registry.validate()?;
                validate_format(&args.output_format, &["csv", "json"])
            }
            Command::ListRepos(args) => {
                args.registry.validate()?;
                if args.limit == 0 {
                    return Err(RegistryError::Validation(
                        "Limit must be greater than 0".to_string(),
                    ));
                }
                validate_format(&args.output_format, &["text", "json"])
            }
            Command::FindHistorical(args) => {
                args.registry.validate()?;
                validate_format(&args.output_format, &["table", "json"])
            }
            Command::Resolve(args) => {
                validate_rate_limit(args.rate_limit)?;
                if args.workers == 0 {
                    return Err(RegistryError::Validation(
                        "Workers must be greater than 0".to_string(),
                    ));
                }
                validate_format(&args.output_format, &["yaml", "json"])
            }
        }
    }
}
