use serde::{Deserialize, Deserializer};
use std::fmt::{Debug, Formatter};
use std::num::NonZeroUsize;
use std::path::Path;
use std::str::FromStr;
use tracing::Level;

const DEFAULTS: &str = include_str!("defaults.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
	pub telemetry: TelemetryConfig,
	pub lakehouse: LakehouseConfig,
}

impl AppConfig {
	/// Loads the configuration from the built-in defaults, an optional TOML file and environment
	/// variables prefixed with `DICOM_LAKEHOUSE_` (nested keys are separated by `__`, e.g.
	/// `DICOM_LAKEHOUSE_LAKEHOUSE__WAREHOUSE_ID`).
	///
	/// Without an explicit path, `config.toml` in the working directory is used if it exists.
	pub fn new(path: Option<&Path>) -> Result<Self, config::ConfigError> {
		let file = match path {
			Some(path) => config::File::from(path).required(true),
			None => config::File::with_name("config.toml").required(false),
		};

		config::Config::builder()
			.add_source(config::File::from_str(DEFAULTS, config::FileFormat::Toml))
			.add_source(file)
			.add_source(
				config::Environment::with_prefix("DICOM_LAKEHOUSE")
					.prefix_separator("_")
					.separator("__")
					.try_parsing(true),
			)
			.build()?
			.try_deserialize()
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
	/// Configurable logging level. `RUST_LOG` takes precedence.
	#[serde(deserialize_with = "deserialize_level")]
	pub level: Level,
	/// Sentry DSN. Sentry is disabled if absent.
	#[serde(default)]
	pub sentry: Option<String>,
}

fn deserialize_level<'de, D>(deserializer: D) -> Result<Level, D::Error>
where
	D: Deserializer<'de>,
{
	let level = String::deserialize(deserializer)?;
	Level::from_str(&level).map_err(serde::de::Error::custom)
}

/// Where retrieved instances end up.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrieveMode {
	/// Write each instance to `{SOPInstanceUID}.dcm` in the save directory.
	#[default]
	Disk,
	/// Parse each instance into an in-memory DICOM object.
	Memory,
}

#[derive(Clone, Deserialize)]
pub struct LakehouseConfig {
	/// Base URL of the workspace, e.g. `https://example.cloud.databricks.com`.
	pub url: String,
	/// Bearer token sent with every request.
	pub token: String,
	/// The SQL warehouse that executes the statements.
	pub warehouse_id: String,
	/// The pixels table, optionally qualified with catalog and schema.
	pub table: String,
	/// Number of concurrent downloads. Defaults to the available parallelism.
	#[serde(default)]
	pub concurrency: Option<usize>,
	/// Restrict CT series searches to axial images.
	#[serde(default = "default_ct_axial_only")]
	pub ct_axial_only: bool,
	#[serde(default)]
	pub retrieve_mode: RetrieveMode,
	/// How long the warehouse may work on a statement before it is cancelled.
	#[serde(default = "default_wait_timeout_secs")]
	pub wait_timeout_secs: u64,
	/// Timeout of a single HTTP request.
	#[serde(default = "default_request_timeout_secs")]
	pub request_timeout_secs: u64,
}

const fn default_ct_axial_only() -> bool {
	true
}

const fn default_wait_timeout_secs() -> u64 {
	30
}

const fn default_request_timeout_secs() -> u64 {
	120
}

impl LakehouseConfig {
	pub fn new(
		url: impl Into<String>,
		token: impl Into<String>,
		warehouse_id: impl Into<String>,
		table: impl Into<String>,
	) -> Self {
		Self {
			url: url.into(),
			token: token.into(),
			warehouse_id: warehouse_id.into(),
			table: table.into(),
			concurrency: None,
			ct_axial_only: default_ct_axial_only(),
			retrieve_mode: RetrieveMode::default(),
			wait_timeout_secs: default_wait_timeout_secs(),
			request_timeout_secs: default_request_timeout_secs(),
		}
	}

	/// The configured download concurrency, falling back to the available parallelism.
	pub fn effective_concurrency(&self) -> usize {
		self.concurrency
			.filter(|&concurrency| concurrency > 0)
			.unwrap_or_else(|| {
				std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
			})
	}
}

impl Debug for LakehouseConfig {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LakehouseConfig")
			.field("url", &self.url)
			.field("token", &"<redacted>")
			.field("warehouse_id", &self.warehouse_id)
			.field("table", &self.table)
			.field("concurrency", &self.concurrency)
			.field("ct_axial_only", &self.ct_axial_only)
			.field("retrieve_mode", &self.retrieve_mode)
			.field("wait_timeout_secs", &self.wait_timeout_secs)
			.field("request_timeout_secs", &self.request_timeout_secs)
			.finish()
	}
}
