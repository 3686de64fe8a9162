//! Image Tag Crawler Library
//!
//! Lists the tags of container images on Docker Hub, MCR, Chainguard and
//! generic OCI registries, and answers "which release tag was newest on this
//! date" for a set of look-back periods, one image or a whole mapping file
//! at a time.

pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod registry;
pub mod resolver;
pub mod tags;

pub use batch::{BatchReport, BatchResolutionDriver, ImageCoordinate, Mapping, ResolutionResult};
pub use config::{AuthScheme, RegistryEndpoint, RegistryKind};
pub use error::{RegistryError, Result};
pub use logging::Logger;
pub use registry::{ClientFactory, RegistryClient, RegistryClients};
pub use resolver::{HistoricalResolver, Period, PeriodResolution};
pub use tags::{ImageTag, TagQuery};
