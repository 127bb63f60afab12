//! A synchronous client for callers without an async runtime.
//!
//! [`LakehouseImagingClient`] owns a multi-threaded Tokio runtime and blocks the calling thread
//! until each operation completes. Downloads still run concurrently on the runtime's workers.
//! Do not use it from within an async context; use [`LakehouseClient`] there instead.

use crate::api::qido::{
	SeriesSearchFilters, SeriesSummary, StudySearchQuery, StudySeries, StudySummary,
};
use crate::api::wado::{
	RetrieveSeriesRequest, RetrievedSeries, SeriesInstanceMetadata, SeriesMetadata,
};
use crate::api::DicomWebClient;
use crate::backend::lakehouse::{LakehouseClient, LakehouseError};
use crate::config::LakehouseConfig;
use tokio::runtime::Runtime;

pub struct LakehouseImagingClient {
	inner: LakehouseClient,
	runtime: Runtime,
}

impl LakehouseImagingClient {
	pub fn new(config: &LakehouseConfig) -> Result<Self, LakehouseError> {
		let inner = LakehouseClient::new(config)?;
		let runtime = tokio::runtime::Builder::new_multi_thread()
			.worker_threads(inner.concurrency())
			.thread_name("lakehouse-worker")
			.enable_all()
			.build()
			.map_err(LakehouseError::Runtime)?;

		Ok(Self { inner, runtime })
	}

	/// The async client that serves the requests.
	pub const fn inner(&self) -> &LakehouseClient {
		&self.inner
	}

	pub fn search(&self, filters: SeriesSearchFilters) -> Result<Vec<SeriesSummary>, LakehouseError> {
		self.runtime.block_on(self.inner.search(filters))
	}

	pub fn retrieve_series(
		&self,
		request: RetrieveSeriesRequest,
	) -> Result<RetrievedSeries, LakehouseError> {
		self.runtime.block_on(self.inner.retrieve_series(request))
	}

	pub fn retrieve_series_metadata(
		&self,
		study_instance_uid: &str,
		series_instance_uid: &str,
	) -> Result<Vec<SeriesMetadata>, LakehouseError> {
		self.runtime.block_on(
			self.inner
				.retrieve_series_metadata(study_instance_uid, series_instance_uid),
		)
	}

	pub fn retrieve_study_metadata(
		&self,
		study_instance_uid: &str,
	) -> Result<Vec<SeriesInstanceMetadata>, LakehouseError> {
		self.runtime
			.block_on(self.inner.retrieve_study_metadata(study_instance_uid))
	}

	pub fn search_for_studies(
		&self,
		query: StudySearchQuery,
	) -> Result<Vec<StudySummary>, LakehouseError> {
		self.runtime.block_on(self.inner.search_for_studies(query))
	}

	pub fn search_for_series_in_study(
		&self,
		study_instance_uid: &str,
	) -> Result<Vec<StudySeries>, LakehouseError> {
		self.runtime
			.block_on(self.inner.search_for_series_in_study(study_instance_uid))
	}
}
