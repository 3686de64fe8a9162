//! Mapping and period files

use crate::batch::{BatchReport, BatchStatistics, Mapping, ResolutionResult};
use crate::error::{RegistryError, Result};
use crate::resolver::Period;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Input of the `resolve` command
#[derive(Debug, Clone, Deserialize)]
pub struct MappingFile {
    #[serde(default)]
    pub mappings: Vec<Mapping>,
    #[serde(default)]
    pub periods: Option<Vec<Period>>,
    /// Passed through to the output untouched
    #[serde(default)]
    pub customer_images: Option<serde_yaml::Value>,
}

impl MappingFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RegistryError::Io(format!("Cannot read mappings file {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: MappingFile = serde_yaml::from_str(content)?;
        if let Some(periods) = &file.periods {
            validate_periods(periods)?;
        }
        Ok(file)
    }

    /// Periods from the file, or the defaults
    pub fn periods(&self) -> Vec<Period> {
        self.periods.clone().unwrap_or_else(Period::defaults)
    }
}

/// Parse a `--periods` JSON array
pub fn parse_periods_json(json: &str) -> Result<Vec<Period>> {
    let periods: Vec<Period> = serde_json::from_str(json)
        .map_err(|e| RegistryError::Validation(format!("Error parsing periods JSON: {}", e)))?;
    validate_periods(&periods)?;
    Ok(periods)
}

/// Longest look-back a period may ask for, roughly 270 years
pub const MAX_OFFSET_DAYS: i64 = 100_000;

pub fn validate_periods(periods: &[Period]) -> Result<()> {
    if periods.is_empty() {
        return Err(RegistryError::Validation(
            "At least one period is required".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for period in periods {
        if period.name.trim().is_empty() {
            return Err(RegistryError::Validation(
                "Period names cannot be empty".to_string(),
            ));
        }
        if period.offset_days < 0 {
            return Err(RegistryError::Validation(format!(
                "Period {} has a negative offset",
                period.name
            )));
        }
        if period.offset_days > MAX_OFFSET_DAYS {
            return Err(RegistryError::Validation(format!(
                "Period {} looks back {} days; the maximum is {}",
                period.name, period.offset_days, MAX_OFFSET_DAYS
            )));
        }
        if !seen.insert(period.name.as_str()) {
            return Err(RegistryError::Validation(format!(
                "Duplicate period name: {}",
                period.name
            )));
        }
    }
    Ok(())
}

/// Output document of the `resolve` command
#[derive(Debug, Serialize)]
pub struct ResolutionOutput<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_images: Option<&'a serde_yaml::Value>,
    pub mappings: &'a [ResolutionResult],
    pub statistics: BatchStatistics,
}

impl<'a> ResolutionOutput<'a> {
    pub fn new(file: &'a MappingFile, report: &'a BatchReport) -> Self {
        Self {
            customer_images: file.customer_images.as_ref(),
            mappings: &report.results,
            statistics: report.statistics,
        }
    }

    pub fn render(&self, format: &str) -> Result<String> {
        match format {
            "json" => Ok(serde_json::to_string_pretty(self)?),
            _ => Ok(serde_yaml::to_string(self)?),
        }
    }

    pub fn write(&self, path: &Path, format: &str) -> Result<()> {
        let content = self.render(format)?;
        std::fs::write(path, content).map_err(|e| {
            RegistryError::Io(format!("Cannot write {}: {}", path.display(), e))
        })
    }
}
