use dicom::core::Tag;
use serde_json::Value;

/// UI (Unique Identifier) value representation.
pub type UI = String;

/// DA (Date) value representation, formatted as `YYYYMMDD`.
pub type DA = String;

/// TM (Time) value representation, formatted as `HHMMSS.FFFFFF`.
pub type TM = String;

/// Formats a tag the way the `meta` column of the pixels table keys its attributes.
///
/// ```
/// use dicom::dictionary_std::tags;
/// assert_eq!(dicom_lakehouse::types::meta_key(tags::SERIES_INSTANCE_UID), "0020000E");
/// ```
pub fn meta_key(tag: Tag) -> String {
	format!("{:04X}{:04X}", tag.0, tag.1)
}

/// Extracts the first value of a DICOM JSON attribute.
///
/// Accepts a bare JSON value (`"1.2.3"`), an attribute object
/// (`{"vr":"UI","Value":["1.2.3"]}`) and person names (`{"Alphabetic":"DOE^JOHN"}`).
pub fn first_value(value: &Value) -> Option<String> {
	match value {
		Value::String(text) => Some(text.clone()),
		Value::Number(number) => Some(number.to_string()),
		Value::Array(values) => values.first().and_then(first_value),
		Value::Object(attribute) => attribute
			.get("Value")
			.and_then(first_value)
			.or_else(|| attribute.get("Alphabetic").and_then(first_value)),
		Value::Null | Value::Bool(_) => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use dicom::dictionary_std::tags;
	use serde_json::json;

	#[test]
	fn meta_keys_are_upper_case_hex() {
		assert_eq!(meta_key(tags::STUDY_INSTANCE_UID), "0020000D");
		assert_eq!(meta_key(tags::SERIES_DESCRIPTION), "0008103E");
		assert_eq!(meta_key(tags::REFERENCED_SERIES_SEQUENCE), "00081115");
	}

	#[test]
	fn first_value_of_attribute() {
		assert_eq!(first_value(&json!("STUDY1")), Some(String::from("STUDY1")));
		assert_eq!(
			first_value(&json!({"vr": "UI", "Value": ["1.2.3", "4.5.6"]})),
			Some(String::from("1.2.3"))
		);
		assert_eq!(
			first_value(&json!({"vr": "PN", "Value": [{"Alphabetic": "DOE^JOHN"}]})),
			Some(String::from("DOE^JOHN"))
		);
		assert_eq!(
			first_value(&json!({"vr": "IS", "Value": [3]})),
			Some(String::from("3"))
		);
		assert_eq!(first_value(&json!({"vr": "LO"})), None);
		assert_eq!(first_value(&Value::Null), None);
	}
}
