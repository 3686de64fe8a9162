//! Command execution

use crate::batch::BatchResolutionDriver;
use crate::cli::args::{
    Args, Command, FindHistoricalArgs, ListReposArgs, ListTagsArgs, RegistryArgs, ResolveArgs,
    rate_limit_delay,
};
use crate::cli::config::{MappingFile, ResolutionOutput, parse_periods_json};
use crate::config::{RegistryEndpoint, RegistryKind};
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use crate::registry::{ClientFactory, RegistryClient, RegistryClients};
use crate::resolver::{HistoricalResolver, Period, PeriodResolution};
use crate::tags::{ImageTag, TagQuery, filter_tags, sort_tags_by_date};
use regex::Regex;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Runner {
    args: Args,
    output: Logger,
}

impl Runner {
    pub fn new(args: Args) -> Self {
        let output = if args.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(args.verbose)
        };
        Self { args, output }
    }

    pub fn logger(&self) -> &Logger {
        &self.output
    }

    pub async fn run(&self) -> Result<()> {
        self.args.validate()?;
        match &self.args.command {
            Command::ListTags(args) => self.list_tags(args).await,
            Command::ListRepos(args) => self.list_repos(args).await,
            Command::FindHistorical(args) => self.find_historical(args).await,
            Command::Resolve(args) => self.resolve(args).await,
        }
    }

    fn client(&self, args: &RegistryArgs) -> Result<Arc<dyn RegistryClient>> {
        let mut clients = RegistryClients::new(self.output.clone())
            .with_rate_limit(rate_limit_delay(args.rate_limit)?);

        let timeout = Duration::from_secs(args.timeout);
        let endpoint = match &args.registry_url {
            Some(url) => args
                .registry
                .default_endpoint()
                .unwrap_or_else(|| RegistryEndpoint::oci(url.as_str()))
                .with_base_url(url.as_str()),
            None => clients.endpoint_for(args.registry)?,
        };
        clients = clients.with_endpoint(args.registry, endpoint.with_timeout(timeout));

        clients.client_for(args.registry)
    }

    fn query(
        repository: &str,
        namespace: Option<&String>,
        pattern: Option<&String>,
    ) -> Result<TagQuery> {
        let mut query = TagQuery::all(repository);
        if let Some(ns) = namespace {
            query = query.with_namespace(ns);
        }
        if let Some(pattern) = pattern {
            query = query.with_pattern(pattern)?;
        }
        Ok(query)
    }

    async fn list_tags(&self, args: &ListTagsArgs) -> Result<()> {
        let client = self.client(&args.registry)?;
        // Filtering is opt-in here, so list everything and filter below.
        let query = Self::query(&args.repository, args.namespace.as_ref(), None)?;

        self.output
            .info(&format!("Fetching tags for {}...", query.qualified_repository()));
        let mut tags = client.list_tags(&query).await;

        if args.filter {
            let pattern = args.pattern.as_deref().map(Regex::new).transpose()?;
            tags = filter_tags(tags, !args.exclude_dev, args.only_semver, pattern.as_ref());
        }
        if args.sort_by_date {
            tags = sort_tags_by_date(tags, true);
        }

        self.output.success(&format!("{} tags", tags.len()));
        let rendered = match args.output_format.as_str() {
            "json" => render_tags_json(&tags)?,
            _ => render_tags_csv(&tags),
        };
        println!("{}", rendered);
        Ok(())
    }

    async fn list_repos(&self, args: &ListReposArgs) -> Result<()> {
        let client = self.client(&args.registry)?;

        self.output
            .info(&format!("Fetching repositories from {} registry...", client.kind()));
        let repositories = client
            .list_repositories(args.namespace.as_deref(), args.limit)
            .await;

        self.output
            .success(&format!("{} repositories", repositories.len()));
        let rendered = match args.output_format.as_str() {
            "json" => serde_json::to_string_pretty(&repositories)?,
            _ => repositories.join("\n"),
        };
        println!("{}", rendered);
        Ok(())
    }

    async fn find_historical(&self, args: &FindHistoricalArgs) -> Result<()> {
        let periods = match &args.periods {
            Some(json) => parse_periods_json(json)?,
            None => Period::defaults(),
        };
        let query = Self::query(&args.repository, args.namespace.as_ref(), args.pattern.as_ref())?
            .only_semver(!args.any_name)
            .exclude_dev(!args.include_dev);

        let client = self.client(&args.registry)?;
        let resolver = HistoricalResolver::new(client, self.output.clone());

        self.output.info(&format!(
            "Finding historical tags for {}...",
            query.qualified_repository()
        ));
        // A failed listing reads as "nothing found" for every period.
        let resolution = match resolver.find_for_periods_now(&query, &periods).await {
            Ok(resolution) => resolution,
            Err(e) => {
                self.output.warning(&format!(
                    "Error fetching tags for {}: {}",
                    query.qualified_repository(),
                    e
                ));
                PeriodResolution::unresolved(&periods)
            }
        };

        let rendered = match args.output_format.as_str() {
            "json" => render_periods_json(&resolution)?,
            _ => render_periods_table(&resolution),
        };
        println!("{}", rendered);
        Ok(())
    }

    async fn resolve(&self, args: &ResolveArgs) -> Result<()> {
        let file = MappingFile::load(&args.mappings)?;
        let periods = match &args.periods {
            Some(json) => parse_periods_json(json)?,
            None => file.periods(),
        };

        let mut clients = RegistryClients::new(self.output.clone())
            .with_rate_limit(rate_limit_delay(args.rate_limit)?);
        if let Some(url) = &args.oci_url {
            clients = clients.with_endpoint(RegistryKind::Oci, RegistryEndpoint::oci(url.as_str()));
        }

        let mapped = file.mappings.iter().filter(|m| m.is_mapped()).count();
        self.output.section("Historical version resolution");
        self.output.info(&format!(
            "Resolving historical versions for {} images ({} mapped)",
            file.mappings.len(),
            mapped
        ));
        if !self.args.verbose {
            self.output.info("(Use --verbose for detailed progress)");
        }

        let start = Instant::now();
        let driver = BatchResolutionDriver::new(Arc::new(clients), self.output.clone())
            .with_periods(periods)
            .with_workers(args.workers);
        let report = driver.resolve_all(file.mappings.clone()).await;
        let elapsed = start.elapsed();

        ResolutionOutput::new(&file, &report).write(&args.output, &args.output_format)?;

        let stats = report.statistics;
        self.output.summary_kv(
            "Historical version resolution complete",
            &[
                ("Total images", stats.total.to_string()),
                ("Successfully resolved", stats.resolved.to_string()),
                ("Failed to resolve", stats.failed.to_string()),
                ("Total time", self.output.format_duration(elapsed)),
                ("Results saved to", args.output.display().to_string()),
            ],
        );
        Ok(())
    }
}

fn csv_field(value: Option<String>) -> String {
    value.unwrap_or_else(|| "unknown".to_string())
}

/// `tag,created,digest,size`, one row per tag
pub fn render_tags_csv(tags: &[ImageTag]) -> String {
    let mut lines = vec!["tag,created,digest,size".to_string()];
    lines.extend(tags.iter().map(|tag| {
        format!(
            "{},{},{},{}",
            tag.name,
            csv_field(tag.created.map(|c| c.to_rfc3339())),
            csv_field(tag.digest.clone()),
            csv_field(tag.size.map(|s| s.to_string())),
        )
    }));
    lines.join("\n")
}

pub fn render_tags_json(tags: &[ImageTag]) -> Result<String> {
    let rows: Vec<_> = tags
        .iter()
        .map(|tag| {
            json!({
                "name": tag.name,
                "created": tag.created.map(|c| c.to_rfc3339()),
                "digest": tag.digest,
                "size": tag.size,
            })
        })
        .collect();
    serde_json::to_string_pretty(&rows).map_err(RegistryError::from)
}

pub fn render_periods_table(resolution: &PeriodResolution) -> String {
    let mut lines = vec![
        format!("{:<20} {:<30} {:<30}", "Period", "Tag", "Created"),
        "-".repeat(80),
    ];
    for (period, tag) in resolution.iter() {
        let name = tag.map(|t| t.name.as_str()).unwrap_or("NOT FOUND");
        let created = tag
            .and_then(|t| t.created)
            .map(|c| c.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string());
        lines.push(format!("{:<20} {:<30} {:<30}", period, name, created).trim_end().to_string());
    }
    lines.join("\n")
}

/// `{period: {tag, created}}`, periods in the order they were given
pub fn render_periods_json(resolution: &PeriodResolution) -> Result<String> {
    serde_json::to_string_pretty(&PeriodSummary(resolution)).map_err(RegistryError::from)
}

struct PeriodSummary<'a>(&'a PeriodResolution);

impl Serialize for PeriodSummary<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (period, tag) in self.0.iter() {
            map.serialize_entry(
                period,
                &json!({
                    "tag": tag.map(|t| t.name.as_str()),
                    "created": tag.and_then(|t| t.created).map(|c| c.to_rfc3339()),
                }),
            )?;
        }
        map.end()
    }
}
