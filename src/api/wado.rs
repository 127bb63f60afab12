use crate::types::{meta_key, UI};
use dicom::dictionary_std::tags;
use dicom::object::{DefaultDicomObject, InMemDicomObject};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Identifies a series to retrieve and where its instances should be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrieveSeriesRequest {
	pub study_instance_uid: UI,
	pub series_instance_uid: UI,
	/// Directory that receives one `{SOPInstanceUID}.dcm` file per instance.
	/// Not used when the backend retrieves into memory.
	pub save_directory: PathBuf,
}

impl RetrieveSeriesRequest {
	pub fn new(
		study_instance_uid: impl Into<UI>,
		series_instance_uid: impl Into<UI>,
		save_directory: impl Into<PathBuf>,
	) -> Self {
		Self {
			study_instance_uid: study_instance_uid.into(),
			series_instance_uid: series_instance_uid.into(),
			save_directory: save_directory.into(),
		}
	}
}

/// The outcome of a series retrieval.
#[derive(Debug)]
pub enum RetrievedSeries {
	/// Instances were written to the save directory. Holds the written paths in completion order.
	Written(Vec<PathBuf>),
	/// Instances were parsed in memory.
	Loaded(Vec<DefaultDicomObject>),
}

impl RetrievedSeries {
	pub fn len(&self) -> usize {
		match self {
			Self::Written(paths) => paths.len(),
			Self::Loaded(objects) => objects.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// The Referenced Series Sequence (0008,1115) of an instance, as DICOM JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesMetadata {
	#[serde(rename = "ReferencedSeriesSequence")]
	pub referenced_series_sequence: Value,
}

impl SeriesMetadata {
	/// Converts the attribute into a data set holding the Referenced Series Sequence.
	pub fn to_dicom_object(&self) -> Result<InMemDicomObject, serde_json::Error> {
		let mut attributes = serde_json::Map::new();
		attributes.insert(
			meta_key(tags::REFERENCED_SERIES_SEQUENCE),
			self.referenced_series_sequence.clone(),
		);
		dicom_json::from_str(&Value::Object(attributes).to_string())
	}
}

/// The instances of one series of a study, with the full metadata of every instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesInstanceMetadata {
	#[serde(rename = "StudyInstanceUID")]
	pub study_instance_uid: UI,
	#[serde(rename = "SeriesInstanceUID")]
	pub series_instance_uid: UI,
	pub instances: Vec<InstanceMetadata>,
}

/// Metadata of a single instance as stored in the pixels table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceMetadata {
	#[serde(rename = "SOPInstanceUID")]
	pub sop_instance_uid: Option<UI>,
	#[serde(rename = "SOPClassUID")]
	pub sop_class_uid: Option<UI>,
	/// Zero-based position of the instance within its series.
	#[serde(rename = "InstanceNumber")]
	pub instance_number: usize,
	/// Path of the file relative to the volume root.
	pub relative_path: Option<String>,
	/// The DICOM JSON data set of the instance.
	pub meta: Value,
}

impl InstanceMetadata {
	pub fn to_dicom_object(&self) -> Result<InMemDicomObject, serde_json::Error> {
		dicom_json::from_value(self.meta.clone())
	}
}
