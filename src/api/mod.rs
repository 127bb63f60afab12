//! The backend-agnostic DICOMweb client interface.
//!
//! Callers program against [`DicomWebClient`]; the lakehouse backend is one implementation of it
//! and any other store that provides the same operations can be substituted.

pub mod qido;
pub mod wado;

use async_trait::async_trait;
use qido::{SeriesSearchFilters, SeriesSummary, StudySearchQuery, StudySeries, StudySummary};
use wado::{RetrieveSeriesRequest, RetrievedSeries, SeriesInstanceMetadata, SeriesMetadata};

#[async_trait]
pub trait DicomWebClient: Send + Sync {
	type Error: std::error::Error + Send + Sync + 'static;

	/// Searches for series matching the given filters.
	///
	/// <https://dicom.nema.org/medical/dicom/current/output/chtml/part18/sect_10.6.html>
	async fn search(&self, filters: SeriesSearchFilters) -> Result<Vec<SeriesSummary>, Self::Error>;

	/// Retrieves every instance of a series.
	async fn retrieve_series(
		&self,
		request: RetrieveSeriesRequest,
	) -> Result<RetrievedSeries, Self::Error>;

	/// Retrieves the Referenced Series Sequence (0008,1115) of every instance of a series that has one.
	async fn retrieve_series_metadata(
		&self,
		study_instance_uid: &str,
		series_instance_uid: &str,
	) -> Result<Vec<SeriesMetadata>, Self::Error>;

	/// Retrieves the metadata of every instance of a study, grouped by series.
	async fn retrieve_study_metadata(
		&self,
		study_instance_uid: &str,
	) -> Result<Vec<SeriesInstanceMetadata>, Self::Error>;

	/// Searches for studies.
	async fn search_for_studies(
		&self,
		query: StudySearchQuery,
	) -> Result<Vec<StudySummary>, Self::Error>;

	/// Lists the series of a single study.
	async fn search_for_series_in_study(
		&self,
		study_instance_uid: &str,
	) -> Result<Vec<StudySeries>, Self::Error>;
}
