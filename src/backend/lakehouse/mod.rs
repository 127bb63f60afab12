//! DICOMweb operations served from a pixels table in a SQL lakehouse.
//!
//! Searches run as parameterized statements on a SQL warehouse. Instances are downloaded from
//! the file-serving endpoint using the `local_path` column of the table.

mod error;
pub mod files;
pub mod records;
pub mod sql;
pub mod statement;

pub use error::LakehouseError;

use crate::api::qido::{
	SeriesSearchFilters, SeriesSummary, StudySearchQuery, StudySeries, StudySummary,
};
use crate::api::wado::{
	RetrieveSeriesRequest, RetrievedSeries, SeriesInstanceMetadata, SeriesMetadata,
};
use crate::api::DicomWebClient;
use crate::config::{LakehouseConfig, RetrieveMode};
use async_trait::async_trait;
use files::FileFetcher;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use sql::{QueryBuilder, TableName};
use statement::StatementExecutor;
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

const USER_AGENT: &str = concat!("dicom-lakehouse/", env!("CARGO_PKG_VERSION"));

/// Builds the `/api/2.0/` base that all endpoints are resolved against.
fn api_base(url: &str) -> Result<Url, LakehouseError> {
	let base = format!("{}/api/2.0/", url.trim_end_matches('/'));
	Url::parse(&base).map_err(|source| LakehouseError::InvalidUrl {
		url: url.to_owned(),
		source,
	})
}

fn http_client(config: &LakehouseConfig) -> Result<Client, LakehouseError> {
	let mut authorization = HeaderValue::from_str(&format!("Bearer {}", config.token))
		.map_err(|_| LakehouseError::InvalidToken)?;
	authorization.set_sensitive(true);

	let mut headers = HeaderMap::new();
	headers.insert(AUTHORIZATION, authorization);

	Ok(Client::builder()
		.default_headers(headers)
		.user_agent(USER_AGENT)
		.timeout(Duration::from_secs(config.request_timeout_secs))
		.build()?)
}

/// A [`DicomWebClient`] backed by a lakehouse pixels table.
#[derive(Debug, Clone)]
pub struct LakehouseClient {
	executor: StatementExecutor,
	files: FileFetcher,
	queries: QueryBuilder,
	concurrency: usize,
	retrieve_mode: RetrieveMode,
}

impl LakehouseClient {
	pub fn new(config: &LakehouseConfig) -> Result<Self, LakehouseError> {
		let api_base = api_base(&config.url)?;
		let table = TableName::parse(&config.table)?;
		let http = http_client(config)?;

		let client = Self {
			executor: StatementExecutor::new(
				http.clone(),
				&api_base,
				&config.warehouse_id,
				Duration::from_secs(config.wait_timeout_secs),
			)?,
			files: FileFetcher::new(http, &api_base)?,
			queries: QueryBuilder::new(table, config.ct_axial_only),
			concurrency: config.effective_concurrency(),
			retrieve_mode: config.retrieve_mode,
		};

		info!(
			api_base = %api_base,
			table = %client.queries.table(),
			concurrency = client.concurrency,
			retrieve_mode = ?client.retrieve_mode,
			"Created lakehouse client"
		);
		Ok(client)
	}

	pub const fn concurrency(&self) -> usize {
		self.concurrency
	}

	pub const fn retrieve_mode(&self) -> RetrieveMode {
		self.retrieve_mode
	}
}

#[async_trait]
impl DicomWebClient for LakehouseClient {
	type Error = LakehouseError;

	#[instrument(skip(self))]
	async fn search(&self, filters: SeriesSearchFilters) -> Result<Vec<SeriesSummary>, Self::Error> {
		let statement = self.queries.search_series(&filters);
		let series = self
			.executor
			.execute(&statement)
			.await?
			.decode(records::series_summary)?;

		info!(series = series.len(), "Series search completed");
		Ok(series)
	}

	#[instrument(skip_all, fields(
		study_instance_uid = %request.study_instance_uid,
		series_instance_uid = %request.series_instance_uid
	))]
	async fn retrieve_series(
		&self,
		request: RetrieveSeriesRequest,
	) -> Result<RetrievedSeries, Self::Error> {
		let statement = self
			.queries
			.retrieve_series(&request.study_instance_uid, &request.series_instance_uid);
		let rows = self
			.executor
			.execute(&statement)
			.await?
			.decode(|row| records::retrieval_row(row, &request.save_directory))?;
		debug!(instances = rows.len(), "Resolved instances");

		let retrieved = match self.retrieve_mode {
			RetrieveMode::Disk => {
				tokio::fs::create_dir_all(&request.save_directory)
					.await
					.map_err(|source| LakehouseError::FileWrite {
						path: request.save_directory.clone(),
						source,
					})?;
				RetrievedSeries::Written(self.files.download_all(rows, self.concurrency).await?)
			}
			RetrieveMode::Memory => {
				RetrievedSeries::Loaded(self.files.load_all(rows, self.concurrency).await?)
			}
		};

		info!(instances = retrieved.len(), "Series retrieved");
		Ok(retrieved)
	}

	#[instrument(skip(self))]
	async fn retrieve_series_metadata(
		&self,
		study_instance_uid: &str,
		series_instance_uid: &str,
	) -> Result<Vec<SeriesMetadata>, Self::Error> {
		let statement = self
			.queries
			.series_metadata(study_instance_uid, series_instance_uid);
		self.executor
			.execute(&statement)
			.await?
			.decode(records::series_metadata)
	}

	#[instrument(skip(self))]
	async fn retrieve_study_metadata(
		&self,
		study_instance_uid: &str,
	) -> Result<Vec<SeriesInstanceMetadata>, Self::Error> {
		let statement = self.queries.study_metadata(study_instance_uid);
		let series = self
			.executor
			.execute(&statement)
			.await?
			.decode(|row| records::series_instance_metadata(row, study_instance_uid))?;

		info!(
			series = series.len(),
			instances = series.iter().map(|series| series.instances.len()).sum::<usize>(),
			"Study metadata retrieved"
		);
		Ok(series)
	}

	#[instrument(skip(self))]
	async fn search_for_studies(
		&self,
		query: StudySearchQuery,
	) -> Result<Vec<StudySummary>, Self::Error> {
		let statement = self.queries.search_studies(&query);
		let studies = self
			.executor
			.execute(&statement)
			.await?
			.decode(records::study_summary)?;

		info!(studies = studies.len(), "Study search completed");
		Ok(studies)
	}

	#[instrument(skip(self))]
	async fn search_for_series_in_study(
		&self,
		study_instance_uid: &str,
	) -> Result<Vec<StudySeries>, Self::Error> {
		let statement = self.queries.series_in_study(study_instance_uid);
		self.executor
			.execute(&statement)
			.await?
			.decode(|row| records::study_series(row, study_instance_uid))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn api_base_ignores_trailing_slashes() {
		assert_eq!(
			api_base("https://example.cloud.databricks.com/").unwrap().as_str(),
			"https://example.cloud.databricks.com/api/2.0/"
		);
		assert_eq!(
			api_base("https://example.cloud.databricks.com").unwrap().as_str(),
			"https://example.cloud.databricks.com/api/2.0/"
		);
	}

	#[test]
	fn invalid_base_url() {
		assert!(matches!(
			api_base("not a url"),
			Err(LakehouseError::InvalidUrl { .. })
		));
	}

	#[test]
	fn invalid_table_is_rejected_before_any_request() {
		let config = LakehouseConfig::new(
			"https://example.com",
			"token",
			"wh-1",
			"main.pixels; DROP TABLE x",
		);
		assert!(matches!(
			LakehouseClient::new(&config),
			Err(LakehouseError::InvalidIdentifier { .. })
		));
	}

	#[test]
	fn token_must_be_a_valid_header() {
		let config = LakehouseConfig::new("https://example.com", "tok\nen", "wh-1", "pixels");
		assert!(matches!(
			LakehouseClient::new(&config),
			Err(LakehouseError::InvalidToken)
		));
	}

	#[test]
	fn concurrency_follows_config() {
		let mut config = LakehouseConfig::new("https://example.com", "token", "wh-1", "pixels");
		config.concurrency = Some(3);
		config.retrieve_mode = RetrieveMode::Memory;

		let client = LakehouseClient::new(&config).unwrap();
		assert_eq!(client.concurrency(), 3);
		assert_eq!(client.retrieve_mode(), RetrieveMode::Memory);
	}
}
