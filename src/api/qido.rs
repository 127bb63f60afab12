use crate::types::{DA, TM, UI};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Filters of a series search.
///
/// Only `Modality` and `SeriesInstanceUID` are recognized; absent keys impose no constraint.
/// Filters can be deserialized from a map or collected from key/value pairs, in which case
/// unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SeriesSearchFilters {
	#[serde(rename = "Modality", alias = "00080060")]
	pub modality: Option<String>,
	#[serde(rename = "SeriesInstanceUID", alias = "0020000E")]
	pub series_instance_uid: Option<UI>,
}

impl SeriesSearchFilters {
	#[must_use]
	pub fn modality(mut self, modality: impl Into<String>) -> Self {
		self.modality = Some(modality.into());
		self
	}

	#[must_use]
	pub fn series_instance_uid(mut self, series_instance_uid: impl Into<UI>) -> Self {
		self.series_instance_uid = Some(series_instance_uid.into());
		self
	}

	pub const fn is_empty(&self) -> bool {
		self.modality.is_none() && self.series_instance_uid.is_none()
	}
}

impl<K, V> FromIterator<(K, V)> for SeriesSearchFilters
where
	K: AsRef<str>,
	V: Into<String>,
{
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		let mut filters = Self::default();
		for (key, value) in iter {
			match key.as_ref() {
				"Modality" | "00080060" => filters.modality = Some(value.into()),
				"SeriesInstanceUID" | "0020000E" => filters.series_instance_uid = Some(value.into()),
				unsupported => debug!(key = unsupported, "Ignoring unsupported search filter"),
			}
		}
		filters
	}
}

/// A series found by [`search`](super::DicomWebClient::search).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesSummary {
	#[serde(rename = "StudyInstanceUID")]
	pub study_instance_uid: UI,
	#[serde(rename = "SeriesInstanceUID")]
	pub series_instance_uid: UI,
	#[serde(rename = "SeriesDescription")]
	pub series_description: Option<String>,
}

/// Match criteria of a study search.
///
/// Text criteria are matched case-insensitively as substrings (`patient_name`,
/// `study_description`) or as prefixes (`patient_id`, `accession_number`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct StudySearchQuery {
	#[serde(rename = "PatientName")]
	pub patient_name: Option<String>,
	#[serde(rename = "PatientID")]
	pub patient_id: Option<String>,
	#[serde(rename = "AccessionNumber")]
	pub accession_number: Option<String>,
	#[serde(rename = "StudyDescription")]
	pub study_description: Option<String>,
	/// Matches studies with any of these modalities.
	#[serde(rename = "ModalitiesInStudy")]
	pub modalities_in_study: Vec<String>,
	/// Inclusive lower bound of the study date.
	pub start_date: Option<DA>,
	/// Inclusive upper bound of the study date.
	pub end_date: Option<DA>,
	pub limit: Option<usize>,
	pub offset: Option<usize>,
}

/// A study found by [`search_for_studies`](super::DicomWebClient::search_for_studies).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudySummary {
	#[serde(rename = "StudyInstanceUID")]
	pub study_instance_uid: UI,
	#[serde(rename = "StudyDate")]
	pub study_date: Option<DA>,
	#[serde(rename = "StudyTime")]
	pub study_time: Option<TM>,
	#[serde(rename = "AccessionNumber")]
	pub accession_number: Option<String>,
	#[serde(rename = "PatientID")]
	pub patient_id: Option<String>,
	#[serde(rename = "PatientName")]
	pub patient_name: Option<String>,
	#[serde(rename = "StudyDescription")]
	pub study_description: Option<String>,
	#[serde(rename = "ModalitiesInStudy")]
	pub modalities_in_study: Vec<String>,
	#[serde(rename = "NumberOfStudyRelatedInstances")]
	pub number_of_instances: u64,
}

/// A series of a study, as listed by
/// [`search_for_series_in_study`](super::DicomWebClient::search_for_series_in_study).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudySeries {
	#[serde(rename = "StudyInstanceUID")]
	pub study_instance_uid: UI,
	#[serde(rename = "SeriesInstanceUID")]
	pub series_instance_uid: UI,
	#[serde(rename = "Modality")]
	pub modality: Option<String>,
	#[serde(rename = "SeriesNumber")]
	pub series_number: Option<String>,
	#[serde(rename = "SeriesDescription")]
	pub series_description: Option<String>,
	#[serde(rename = "NumberOfSeriesRelatedInstances")]
	pub number_of_instances: u64,
}
