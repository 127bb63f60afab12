//! Decodes result rows into DICOMweb records.
//!
//! Column order follows the projections built in [`super::sql`].

use super::files::RetrievalRow;
use super::statement::Row;
use super::LakehouseError;
use crate::api::qido::{SeriesSummary, StudySeries, StudySummary};
use crate::api::wado::{InstanceMetadata, SeriesInstanceMetadata, SeriesMetadata};
use crate::types::{first_value, UI};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

fn required(value: &Value, column: &'static str) -> Result<String, LakehouseError> {
	first_value(value).ok_or(LakehouseError::MissingValue { column })
}

/// Instance counts arrive as text, e.g. `"12"`.
fn count(row: &Row<'_>, index: usize, column: &'static str) -> Result<u64, LakehouseError> {
	row.json(index, column)?
		.as_u64()
		.ok_or(LakehouseError::MissingValue { column })
}

fn optional_text(row: &Row<'_>, index: usize, column: &'static str) -> Result<Option<String>, LakehouseError> {
	Ok(row
		.text(index, column)?
		.filter(|text| !text.is_empty())
		.map(str::to_owned))
}

pub fn series_summary(row: Row<'_>) -> Result<SeriesSummary, LakehouseError> {
	Ok(SeriesSummary {
		study_instance_uid: required(&row.json(0, "StudyInstanceUID")?, "StudyInstanceUID")?,
		series_instance_uid: required(&row.json(1, "SeriesInstanceUID")?, "SeriesInstanceUID")?,
		series_description: first_value(&row.json(2, "SeriesDescription")?),
	})
}

pub fn retrieval_row(row: Row<'_>, save_directory: &Path) -> Result<RetrievalRow, LakehouseError> {
	Ok(RetrievalRow {
		local_path: row.required_text(0, "local_path")?.to_owned(),
		save_directory: save_directory.to_path_buf(),
		sop_instance_uid: UI::from(row.required_text(1, "SOPInstanceUID")?),
	})
}

pub fn series_metadata(row: Row<'_>) -> Result<SeriesMetadata, LakehouseError> {
	Ok(SeriesMetadata {
		referenced_series_sequence: row.json(0, "ReferencedSeriesSequence")?,
	})
}

pub fn study_summary(row: Row<'_>) -> Result<StudySummary, LakehouseError> {
	let modalities = optional_text(&row, 7, "ModalitiesInStudy")?
		.map(|modalities| modalities.split('/').map(str::to_owned).collect())
		.unwrap_or_default();

	Ok(StudySummary {
		study_instance_uid: UI::from(row.required_text(0, "StudyInstanceUID")?),
		study_date: optional_text(&row, 1, "StudyDate")?,
		study_time: optional_text(&row, 2, "StudyTime")?,
		accession_number: optional_text(&row, 3, "AccessionNumber")?,
		patient_id: optional_text(&row, 4, "PatientID")?,
		patient_name: first_value(&row.json(5, "PatientName")?),
		study_description: first_value(&row.json(6, "StudyDescription")?),
		modalities_in_study: modalities,
		number_of_instances: count(&row, 8, "NumberOfStudyRelatedInstances")?,
	})
}

pub fn study_series(row: Row<'_>, study_instance_uid: &str) -> Result<StudySeries, LakehouseError> {
	Ok(StudySeries {
		study_instance_uid: UI::from(study_instance_uid),
		series_instance_uid: UI::from(row.required_text(0, "SeriesInstanceUID")?),
		modality: optional_text(&row, 1, "Modality")?,
		series_number: optional_text(&row, 2, "SeriesNumber")?,
		series_description: optional_text(&row, 3, "SeriesDescription")?,
		number_of_instances: count(&row, 4, "NumberOfSeriesRelatedInstances")?,
	})
}

/// An element of the `instances` column of the study metadata projection.
#[derive(Deserialize)]
struct InstanceEntry {
	#[serde(rename = "SOPInstanceUID", default)]
	sop_instance_uid: Option<String>,
	#[serde(rename = "SOPClassUID", default)]
	sop_class_uid: Option<String>,
	#[serde(default)]
	meta: Value,
	#[serde(default)]
	relative_path: Option<String>,
}

pub fn series_instance_metadata(
	row: Row<'_>,
	study_instance_uid: &str,
) -> Result<SeriesInstanceMetadata, LakehouseError> {
	let entries: Vec<InstanceEntry> = serde_json::from_value(row.json(1, "instances")?)
		.map_err(|source| LakehouseError::Decode {
			column: "instances",
			source,
		})?;

	let instances = entries
		.into_iter()
		.enumerate()
		.map(|(instance_number, entry)| {
			// The meta column holds DICOM JSON as text.
			let meta = match entry.meta {
				Value::String(text) => serde_json::from_str(&text)
					.map_err(|source| LakehouseError::Decode { column: "meta", source })?,
				meta => meta,
			};
			Ok::<_, LakehouseError>(InstanceMetadata {
				sop_instance_uid: entry.sop_instance_uid,
				sop_class_uid: entry.sop_class_uid,
				instance_number,
				relative_path: entry.relative_path,
				meta,
			})
		})
		.collect::<Result<Vec<_>, _>>()?;

	Ok(SeriesInstanceMetadata {
		study_instance_uid: UI::from(study_instance_uid),
		series_instance_uid: UI::from(row.required_text(0, "SeriesInstanceUID")?),
		instances,
	})
}

#[cfg(test)]
mod tests {
	use super::super::statement::ResultRows;
	use super::*;
	use serde_json::json;
	use std::path::PathBuf;

	fn rows(cells: &[&[Option<&str>]]) -> ResultRows {
		cells
			.iter()
			.map(|row| row.iter().map(|cell| cell.map(str::to_owned)).collect())
			.collect::<Vec<Vec<Option<String>>>>()
			.into()
	}

	#[test]
	fn decodes_plain_json_strings() {
		let rows = rows(&[&[Some("\"STUDY1\""), Some("\"SERIES1\""), Some("\"Chest CT\"")]]);

		assert_eq!(
			rows.decode(series_summary).unwrap(),
			vec![SeriesSummary {
				study_instance_uid: UI::from("STUDY1"),
				series_instance_uid: UI::from("SERIES1"),
				series_description: Some(String::from("Chest CT")),
			}]
		);
	}

	#[test]
	fn decodes_dicom_json_attributes() {
		let rows = rows(&[&[
			Some(r#"{"vr":"UI","Value":["1.2.3"]}"#),
			Some(r#"{"vr":"UI","Value":["1.2.3.4"]}"#),
			None,
		]]);

		let summaries = rows.decode(series_summary).unwrap();
		assert_eq!(summaries[0].study_instance_uid, "1.2.3");
		assert_eq!(summaries[0].series_instance_uid, "1.2.3.4");
		assert_eq!(summaries[0].series_description, None);
	}

	#[test]
	fn series_uid_is_required() {
		let rows = rows(&[&[Some("\"STUDY1\""), None, None]]);
		assert!(matches!(
			rows.decode(series_summary),
			Err(LakehouseError::MissingValue {
				column: "SeriesInstanceUID"
			})
		));
	}

	#[test]
	fn retrieval_rows_are_plain_text() {
		let rows = rows(&[&[Some("/Volumes/main/pixels/1.dcm"), Some("1.2.3.1")]]);
		let decoded = rows
			.decode(|row| retrieval_row(row, Path::new("/tmp/series")))
			.unwrap();

		assert_eq!(
			decoded,
			vec![RetrievalRow {
				local_path: String::from("/Volumes/main/pixels/1.dcm"),
				save_directory: PathBuf::from("/tmp/series"),
				sop_instance_uid: UI::from("1.2.3.1"),
			}]
		);
	}

	#[test]
	fn metadata_keeps_nested_structure() {
		let rows = rows(&[&[Some(
			r#"{"vr":"SQ","Value":[{"0020000E":{"vr":"UI","Value":["1.2"]}}]}"#,
		)]]);

		assert_eq!(
			rows.decode(series_metadata).unwrap()[0].referenced_series_sequence,
			json!({"vr": "SQ", "Value": [{"0020000E": {"vr": "UI", "Value": ["1.2"]}}]})
		);
	}

	#[test]
	fn study_rows() {
		let rows = rows(&[&[
			Some("1.2.3"),
			Some("20240102"),
			None,
			Some("ACC1"),
			Some("PID1"),
			Some(r#"{"vr":"PN","Value":[{"Alphabetic":"DOE^JANE"}]}"#),
			Some(r#"{"vr":"LO","Value":["CT Thorax"]}"#),
			Some("CT/SR"),
			Some("42"),
		]]);

		let study = rows.decode(study_summary).unwrap().remove(0);
		assert_eq!(study.study_instance_uid, "1.2.3");
		assert_eq!(study.study_date.as_deref(), Some("20240102"));
		assert_eq!(study.study_time, None);
		assert_eq!(study.patient_name.as_deref(), Some("DOE^JANE"));
		assert_eq!(study.study_description.as_deref(), Some("CT Thorax"));
		assert_eq!(study.modalities_in_study, vec!["CT", "SR"]);
		assert_eq!(study.number_of_instances, 42);
	}

	#[test]
	fn study_series_rows() {
		let rows = rows(&[&[Some("1.2.3.4"), Some("CT"), Some("2"), Some(""), Some("120")]]);

		let series = rows
			.decode(|row| study_series(row, "1.2.3"))
			.unwrap()
			.remove(0);
		assert_eq!(series.study_instance_uid, "1.2.3");
		assert_eq!(series.modality.as_deref(), Some("CT"));
		assert_eq!(series.series_description, None);
		assert_eq!(series.number_of_instances, 120);
	}

	#[test]
	fn study_metadata_rows() {
		let instances = json!([
			{
				"SOPInstanceUID": "1.2.3.4.1",
				"SOPClassUID": "1.2.840.10008.5.1.4.1.1.2",
				"meta": r#"{"00080060":{"vr":"CS","Value":["CT"]}}"#,
				"relative_path": "pixels/1.dcm"
			},
			{
				"SOPInstanceUID": "1.2.3.4.2",
				"meta": {"00080060": {"vr": "CS", "Value": ["CT"]}}
			}
		])
		.to_string();
		let rows = rows(&[&[Some("1.2.3.4"), Some(instances.as_str())]]);

		let series = rows
			.decode(|row| series_instance_metadata(row, "1.2.3"))
			.unwrap()
			.remove(0);
		assert_eq!(series.study_instance_uid, "1.2.3");
		assert_eq!(series.series_instance_uid, "1.2.3.4");
		assert_eq!(series.instances.len(), 2);
		assert_eq!(series.instances[0].meta["00080060"]["Value"][0], json!("CT"));
		assert_eq!(series.instances[0].relative_path.as_deref(), Some("pixels/1.dcm"));
		assert_eq!(series.instances[1].instance_number, 1);
		assert_eq!(series.instances[1].sop_class_uid, None);
		assert_eq!(series.instances[1].meta, series.instances[0].meta);
	}

	#[test]
	fn study_metadata_rejects_invalid_meta() {
		let instances = json!([{"SOPInstanceUID": "1", "meta": "{not json"}]).to_string();
		let rows = rows(&[&[Some("1.2.3.4"), Some(instances.as_str())]]);

		assert!(matches!(
			rows.decode(|row| series_instance_metadata(row, "1.2.3")),
			Err(LakehouseError::Decode { column: "meta", .. })
		));
	}
}
