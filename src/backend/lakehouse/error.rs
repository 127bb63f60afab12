use super::statement::StatementState;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LakehouseError {
	/// The warehouse reported that the statement failed.
	#[error("statement failed with {error_code}: {message}")]
	Upstream { error_code: String, message: String },
	/// The statement ended without a complete result, e.g. it was cancelled at the wait timeout.
	#[error("statement {statement_id:?} ended in state {state:?} without a result")]
	Unfinished {
		statement_id: String,
		state: StatementState,
	},
	/// The response carried neither a status nor a result.
	#[error("unrecognized response from the statement execution API: {body}")]
	MalformedResponse { body: String },
	#[error(transparent)]
	Transport(#[from] reqwest::Error),
	#[error("failed to write {}: {source}", path.display())]
	FileWrite {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("invalid table identifier {identifier:?}")]
	InvalidIdentifier { identifier: String },
	#[error("invalid base URL {url:?}: {source}")]
	InvalidUrl {
		url: String,
		#[source]
		source: url::ParseError,
	},
	#[error("the bearer token contains characters that are not allowed in a header")]
	InvalidToken,
	#[error("invalid SOP Instance UID {uid:?}")]
	InvalidInstanceUid { uid: String },
	#[error("column {column} does not hold valid JSON: {source}")]
	Decode {
		column: &'static str,
		#[source]
		source: serde_json::Error,
	},
	#[error("result row has no value for {column}")]
	MissingValue { column: &'static str },
	#[error(transparent)]
	Dicom(#[from] dicom::object::ReadError),
	#[error("download worker failed: {0}")]
	Worker(#[from] tokio::task::JoinError),
	#[error("failed to start the runtime: {0}")]
	Runtime(#[source] std::io::Error),
}
