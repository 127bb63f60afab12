//! Translates DICOMweb searches into SQL statements against the pixels table.
//!
//! Attributes are read from the `meta` column, which holds the DICOM JSON of each instance.
//! Caller-supplied values never become part of the statement text: every [`Term`] binds its value
//! as a named parameter marker that the warehouse substitutes.

use super::LakehouseError;
use crate::api::qido::{SeriesSearchFilters, StudySearchQuery};
use crate::types::meta_key;
use dicom::core::Tag;
use dicom::dictionary_std::tags;
use serde::Serialize;
use std::fmt::{Display, Formatter};

/// Image Type (0008,0008) value that CT searches are narrowed to.
const AXIAL: &str = "axial";

/// A validated table name, optionally qualified with catalog and schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName(Vec<String>);

impl TableName {
	pub fn parse(identifier: &str) -> Result<Self, LakehouseError> {
		let parts: Vec<String> = identifier
			.split('.')
			.map(|part| part.trim().trim_matches('`').to_owned())
			.collect();

		let valid = parts.len() <= 3
			&& parts.iter().all(|part| {
				!part.is_empty()
					&& part
						.chars()
						.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
			});

		if valid {
			Ok(Self(parts))
		} else {
			Err(LakehouseError::InvalidIdentifier {
				identifier: identifier.to_owned(),
			})
		}
	}
}

impl Display for TableName {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		for (index, part) in self.0.iter().enumerate() {
			if index > 0 {
				f.write_str(".")?;
			}
			write!(f, "`{part}`")?;
		}
		Ok(())
	}
}

/// An expression that reads an attribute from the `meta` column.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Field {
	/// The whole attribute as DICOM JSON, e.g. `meta:['00080008']`.
	Attribute(Tag),
	/// The value array of an attribute, e.g. `meta:['00100010'].Value`.
	Values(Tag),
	/// The first value of an attribute, e.g. `meta:['0020000D'].Value[0]`.
	FirstValue(Tag),
}

impl Display for Field {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Attribute(tag) => write!(f, "meta:['{}']", meta_key(*tag)),
			Self::Values(tag) => write!(f, "meta:['{}'].Value", meta_key(*tag)),
			Self::FirstValue(tag) => write!(f, "meta:['{}'].Value[0]", meta_key(*tag)),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
	Equals(String),
	/// Case-insensitive substring match.
	ContainsIgnoreCase(String),
	StartsWith(String),
	AtLeast(String),
	AtMost(String),
	In(Vec<String>),
	IsNotNull,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
	pub field: Field,
	pub operator: Operator,
}

impl Term {
	pub const fn new(field: Field, operator: Operator) -> Self {
		Self { field, operator }
	}

	fn render(&self, parameters: &mut Parameters) -> String {
		let field = self.field;
		match &self.operator {
			Operator::Equals(value) => format!("{field} = {}", parameters.bind(value)),
			Operator::ContainsIgnoreCase(value) => {
				format!("contains(lower({field}), lower({}))", parameters.bind(value))
			}
			Operator::StartsWith(value) => {
				format!("startswith({field}, {})", parameters.bind(value))
			}
			Operator::AtLeast(value) => format!("{field} >= {}", parameters.bind(value)),
			Operator::AtMost(value) => format!("{field} <= {}", parameters.bind(value)),
			Operator::In(values) if values.is_empty() => String::from("FALSE"),
			Operator::In(values) => {
				let markers: Vec<String> = values.iter().map(|v| parameters.bind(v)).collect();
				format!("{field} IN ({})", markers.join(", "))
			}
			Operator::IsNotNull => format!("{field} IS NOT NULL"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
	Term(Term),
	/// Matches if any of the terms matches.
	Any(Vec<Term>),
}

impl From<Term> for Predicate {
	fn from(term: Term) -> Self {
		Self::Term(term)
	}
}

impl Predicate {
	fn render(&self, parameters: &mut Parameters) -> String {
		match self {
			Self::Term(term) => term.render(parameters),
			Self::Any(terms) if terms.is_empty() => String::from("FALSE"),
			Self::Any(terms) => {
				let terms: Vec<String> = terms.iter().map(|t| t.render(parameters)).collect();
				format!("({})", terms.join(" OR "))
			}
		}
	}
}

/// A conjunction of predicates. An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter(Vec<Predicate>);

impl Filter {
	pub fn push(&mut self, predicate: impl Into<Predicate>) {
		self.0.push(predicate.into());
	}

	pub fn predicates(&self) -> &[Predicate] {
		&self.0
	}

	pub fn is_unconstrained(&self) -> bool {
		self.0.is_empty()
	}

	/// Renders the filter as the body of a `WHERE` clause, starting from `1=1`.
	pub fn render(&self, parameters: &mut Parameters) -> String {
		std::iter::once(String::from("1=1"))
			.chain(self.0.iter().map(|predicate| predicate.render(parameters)))
			.collect::<Vec<_>>()
			.join(" AND ")
	}
}

/// A named parameter of a statement, bound to a `:name` marker.
///
/// <https://docs.databricks.com/api/workspace/statementexecution/executestatement>
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementParameter {
	pub name: String,
	pub value: String,
	#[serde(rename = "type")]
	pub kind: &'static str,
}

#[derive(Debug, Default)]
pub struct Parameters(Vec<StatementParameter>);

impl Parameters {
	/// Binds a string value and returns the marker that refers to it.
	pub fn bind(&mut self, value: &str) -> String {
		let name = format!("p{}", self.0.len());
		let marker = format!(":{name}");
		self.0.push(StatementParameter {
			name,
			value: value.to_owned(),
			kind: "STRING",
		});
		marker
	}

	fn into_statement(self, text: String) -> Statement {
		Statement {
			text,
			parameters: self.0,
		}
	}
}

/// SQL text together with the values of its parameter markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
	pub text: String,
	pub parameters: Vec<StatementParameter>,
}

impl Statement {
	pub fn parameter(&self, name: &str) -> Option<&str> {
		self.parameters
			.iter()
			.find(|parameter| parameter.name == name)
			.map(|parameter| parameter.value.as_str())
	}
}

/// Column aliases that survive the round-trip through the result's `data_array`.
fn alias(tag: Tag) -> String {
	format!("`{}`", meta_key(tag))
}

#[derive(Debug, Clone)]
pub struct QueryBuilder {
	table: TableName,
	ct_axial_only: bool,
}

impl QueryBuilder {
	pub const fn new(table: TableName, ct_axial_only: bool) -> Self {
		Self {
			table,
			ct_axial_only,
		}
	}

	pub const fn table(&self) -> &TableName {
		&self.table
	}

	/// Builds the filter of a series search.
	///
	/// A modality narrows the search to that modality. CT searches are further restricted to
	/// axial images unless disabled.
	pub fn series_filter(&self, filters: &SeriesSearchFilters) -> Filter {
		let mut filter = Filter::default();

		if let Some(modality) = &filters.modality {
			filter.push(Term::new(
				Field::FirstValue(tags::MODALITY),
				Operator::Equals(modality.clone()),
			));
			if self.ct_axial_only && modality.contains("CT") {
				filter.push(Term::new(
					Field::Attribute(tags::IMAGE_TYPE),
					Operator::ContainsIgnoreCase(String::from(AXIAL)),
				));
			}
		}

		if let Some(series_instance_uid) = &filters.series_instance_uid {
			filter.push(Term::new(
				Field::FirstValue(tags::SERIES_INSTANCE_UID),
				Operator::Equals(series_instance_uid.clone()),
			));
		}

		filter
	}

	/// Selects the distinct (study, series, description) triples of matching instances.
	///
	/// Each column holds the DICOM JSON attribute.
	pub fn search_series(&self, filters: &SeriesSearchFilters) -> Statement {
		let mut parameters = Parameters::default();
		let predicate = self.series_filter(filters).render(&mut parameters);

		let text = format!(
			"SELECT DISTINCT\n\
			\t{study} AS {study_alias},\n\
			\t{series} AS {series_alias},\n\
			\t{description} AS {description_alias}\n\
			FROM {table}\n\
			WHERE {predicate}",
			study = Field::Attribute(tags::STUDY_INSTANCE_UID),
			study_alias = alias(tags::STUDY_INSTANCE_UID),
			series = Field::Attribute(tags::SERIES_INSTANCE_UID),
			series_alias = alias(tags::SERIES_INSTANCE_UID),
			description = Field::Attribute(tags::SERIES_DESCRIPTION),
			description_alias = alias(tags::SERIES_DESCRIPTION),
			table = self.table,
		);

		parameters.into_statement(text)
	}

	fn series_instances_filter(study_instance_uid: &str, series_instance_uid: &str) -> Filter {
		let mut filter = Filter::default();
		filter.push(Term::new(
			Field::FirstValue(tags::SERIES_INSTANCE_UID),
			Operator::Equals(series_instance_uid.to_owned()),
		));
		filter.push(Term::new(
			Field::FirstValue(tags::STUDY_INSTANCE_UID),
			Operator::Equals(study_instance_uid.to_owned()),
		));
		filter
	}

	/// Selects the storage path and the SOP Instance UID of every instance of a series.
	pub fn retrieve_series(&self, study_instance_uid: &str, series_instance_uid: &str) -> Statement {
		let mut parameters = Parameters::default();
		let predicate = Self::series_instances_filter(study_instance_uid, series_instance_uid)
			.render(&mut parameters);

		let text = format!(
			"SELECT local_path, {sop} AS SOPInstanceUID\n\
			FROM {table}\n\
			WHERE {predicate}",
			sop = Field::FirstValue(tags::SOP_INSTANCE_UID),
			table = self.table,
		);

		parameters.into_statement(text)
	}

	/// Selects the Referenced Series Sequence of every instance of a series that has one.
	pub fn series_metadata(&self, study_instance_uid: &str, series_instance_uid: &str) -> Statement {
		let mut filter = Self::series_instances_filter(study_instance_uid, series_instance_uid);
		filter.push(Term::new(
			Field::Attribute(tags::REFERENCED_SERIES_SEQUENCE),
			Operator::IsNotNull,
		));

		let mut parameters = Parameters::default();
		let predicate = filter.render(&mut parameters);

		let text = format!(
			"SELECT {sequence} AS {sequence_alias}\n\
			FROM {table}\n\
			WHERE {predicate}",
			sequence = Field::Attribute(tags::REFERENCED_SERIES_SEQUENCE),
			sequence_alias = alias(tags::REFERENCED_SERIES_SEQUENCE),
			table = self.table,
		);

		parameters.into_statement(text)
	}

	/// Collects the metadata of every instance of a study, one row per series.
	///
	/// Columns: series UID (plain text) and the instances as a JSON array of
	/// `{SOPInstanceUID, SOPClassUID, meta, relative_path}` objects.
	pub fn study_metadata(&self, study_instance_uid: &str) -> Statement {
		let mut filter = Filter::default();
		filter.push(Term::new(
			Field::FirstValue(tags::STUDY_INSTANCE_UID),
			Operator::Equals(study_instance_uid.to_owned()),
		));

		let mut parameters = Parameters::default();
		let predicate = filter.render(&mut parameters);

		let text = format!(
			"SELECT\n\
			\t{series} AS series_instance_uid,\n\
			\tto_json(collect_list(named_struct(\n\
			\t\t'SOPInstanceUID', {sop},\n\
			\t\t'SOPClassUID', {sop_class},\n\
			\t\t'meta', meta,\n\
			\t\t'relative_path', relative_path\n\
			\t))) AS instances\n\
			FROM {table}\n\
			WHERE {predicate}\n\
			GROUP BY series_instance_uid",
			series = Field::FirstValue(tags::SERIES_INSTANCE_UID),
			sop = Field::FirstValue(tags::SOP_INSTANCE_UID),
			sop_class = Field::FirstValue(tags::SOP_CLASS_UID),
			table = self.table,
		);

		parameters.into_statement(text)
	}

	pub fn study_filter(query: &StudySearchQuery) -> Filter {
		let mut filter = Filter::default();

		if let Some(patient_name) = &query.patient_name {
			filter.push(Term::new(
				Field::Values(tags::PATIENT_NAME),
				Operator::ContainsIgnoreCase(patient_name.clone()),
			));
		}
		if let Some(patient_id) = &query.patient_id {
			filter.push(Term::new(
				Field::FirstValue(tags::PATIENT_ID),
				Operator::StartsWith(patient_id.clone()),
			));
		}
		if let Some(accession_number) = &query.accession_number {
			filter.push(Term::new(
				Field::FirstValue(tags::ACCESSION_NUMBER),
				Operator::StartsWith(accession_number.clone()),
			));
		}
		if let Some(study_description) = &query.study_description {
			filter.push(Term::new(
				Field::Values(tags::STUDY_DESCRIPTION),
				Operator::ContainsIgnoreCase(study_description.clone()),
			));
		}
		if !query.modalities_in_study.is_empty() {
			filter.push(Predicate::Any(vec![
				Term::new(
					Field::FirstValue(tags::MODALITY),
					Operator::In(query.modalities_in_study.clone()),
				),
				Term::new(
					Field::FirstValue(tags::MODALITIES_IN_STUDY),
					Operator::In(query.modalities_in_study.clone()),
				),
			]));
		}
		if let Some(start_date) = &query.start_date {
			filter.push(Term::new(
				Field::FirstValue(tags::STUDY_DATE),
				Operator::AtLeast(start_date.clone()),
			));
		}
		if let Some(end_date) = &query.end_date {
			filter.push(Term::new(
				Field::FirstValue(tags::STUDY_DATE),
				Operator::AtMost(end_date.clone()),
			));
		}

		filter
	}

	/// Aggregates matching instances per study.
	///
	/// Columns: study UID, date, time, accession number, patient ID (plain text), patient name,
	/// study description (DICOM JSON), modalities joined by `/` and the instance count.
	pub fn search_studies(&self, query: &StudySearchQuery) -> Statement {
		let mut parameters = Parameters::default();
		let predicate = Self::study_filter(query).render(&mut parameters);

		let mut text = format!(
			"SELECT\n\
			\t{study} AS study_instance_uid,\n\
			\tnullif({date}, '') AS study_date,\n\
			\tnullif({time}, '') AS study_time,\n\
			\tnullif({accession}, '') AS accession_number,\n\
			\tnullif({patient_id}, '') AS patient_id,\n\
			\tfirst({patient_name}, true) AS patient_name,\n\
			\tfirst({description}, true) AS study_description,\n\
			\tarray_join(array_union(\n\
			\t\tcollect_set(nullif({modality}, '')),\n\
			\t\tcollect_set(nullif({modalities}, ''))\n\
			\t), '/') AS modalities,\n\
			\tcount(*) AS instances\n\
			FROM {table}\n\
			WHERE {predicate}\n\
			GROUP BY study_instance_uid, study_date, study_time, accession_number, patient_id",
			study = Field::FirstValue(tags::STUDY_INSTANCE_UID),
			date = Field::FirstValue(tags::STUDY_DATE),
			time = Field::FirstValue(tags::STUDY_TIME),
			accession = Field::FirstValue(tags::ACCESSION_NUMBER),
			patient_id = Field::FirstValue(tags::PATIENT_ID),
			patient_name = Field::Attribute(tags::PATIENT_NAME),
			description = Field::Attribute(tags::STUDY_DESCRIPTION),
			modality = Field::FirstValue(tags::MODALITY),
			modalities = Field::FirstValue(tags::MODALITIES_IN_STUDY),
			table = self.table,
		);

		// Typed integers, so they are safe to inline.
		if let Some(limit) = query.limit {
			text.push_str(&format!("\nLIMIT {limit}"));
		}
		if let Some(offset) = query.offset {
			text.push_str(&format!("\nOFFSET {offset}"));
		}

		parameters.into_statement(text)
	}

	/// Aggregates the instances of one study per series.
	pub fn series_in_study(&self, study_instance_uid: &str) -> Statement {
		let mut filter = Filter::default();
		filter.push(Term::new(
			Field::FirstValue(tags::STUDY_INSTANCE_UID),
			Operator::Equals(study_instance_uid.to_owned()),
		));

		let mut parameters = Parameters::default();
		let predicate = filter.render(&mut parameters);

		let text = format!(
			"SELECT\n\
			\t{series} AS series_instance_uid,\n\
			\tfirst({modality}, true) AS modality,\n\
			\tfirst({number}, true) AS series_number,\n\
			\tfirst({description}, true) AS series_description,\n\
			\tcount(*) AS instances\n\
			FROM {table}\n\
			WHERE {predicate}\n\
			GROUP BY series_instance_uid",
			series = Field::FirstValue(tags::SERIES_INSTANCE_UID),
			modality = Field::FirstValue(tags::MODALITY),
			number = Field::FirstValue(tags::SERIES_NUMBER),
			description = Field::FirstValue(tags::SERIES_DESCRIPTION),
			table = self.table,
		);

		parameters.into_statement(text)
	}
}
