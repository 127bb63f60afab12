//! Submits statements to the SQL Statement Execution API and classifies the outcome.
//!
//! <https://docs.databricks.com/api/workspace/statementexecution>

use super::sql::{Statement, StatementParameter};
use super::LakehouseError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

/// Request body of `POST /api/2.0/sql/statements/`.
#[derive(Debug, Serialize)]
pub struct ExecuteStatementRequest<'a> {
	pub warehouse_id: &'a str,
	pub statement: &'a str,
	#[serde(skip_serializing_if = "<[_]>::is_empty")]
	pub parameters: &'a [StatementParameter],
	pub wait_timeout: String,
	pub on_wait_timeout: OnWaitTimeout,
}

/// What the warehouse does with a statement still running after the wait timeout.
///
/// Statements are never polled, so a statement that outlives the wait timeout is cancelled.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnWaitTimeout {
	Cancel,
}

#[derive(Debug, Deserialize)]
pub struct StatementResponse {
	#[serde(default)]
	pub statement_id: Option<String>,
	#[serde(default)]
	pub status: Option<StatementStatus>,
	#[serde(default)]
	pub result: Option<ResultData>,
}

#[derive(Debug, Deserialize)]
pub struct StatementStatus {
	pub state: StatementState,
	#[serde(default)]
	pub error: Option<ServiceError>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementState {
	Pending,
	Running,
	Succeeded,
	Failed,
	Canceled,
	Closed,
	#[serde(other)]
	Unknown,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServiceError {
	#[serde(default)]
	pub error_code: Option<String>,
	#[serde(default)]
	pub message: Option<String>,
}

/// A chunk of inline rows. The first chunk is embedded in the statement response, further chunks
/// are fetched from `next_chunk_internal_link`.
#[derive(Debug, Deserialize)]
pub struct ResultData {
	/// Inline rows; every cell is text (or null).
	#[serde(default)]
	pub data_array: Option<Vec<Vec<Option<String>>>>,
	#[serde(default)]
	pub next_chunk_internal_link: Option<String>,
}

/// Rows of a successful statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultRows(Vec<Vec<Option<String>>>);

impl ResultRows {
	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
		self.0.iter().map(|cells| Row(cells.as_slice()))
	}

	/// Decodes every row, failing on the first row that cannot be decoded.
	pub fn decode<T, F>(&self, decoder: F) -> Result<Vec<T>, LakehouseError>
	where
		F: FnMut(Row<'_>) -> Result<T, LakehouseError>,
	{
		self.rows().map(decoder).collect()
	}
}

impl From<Vec<Vec<Option<String>>>> for ResultRows {
	fn from(rows: Vec<Vec<Option<String>>>) -> Self {
		Self(rows)
	}
}

#[derive(Debug, Copy, Clone)]
pub struct Row<'a>(&'a [Option<String>]);

impl<'a> Row<'a> {
	/// The raw text of a cell. `None` if the cell is null.
	pub fn text(&self, index: usize, column: &'static str) -> Result<Option<&'a str>, LakehouseError> {
		self.0
			.get(index)
			.map(Option::as_deref)
			.ok_or(LakehouseError::MissingValue { column })
	}

	pub fn required_text(&self, index: usize, column: &'static str) -> Result<&'a str, LakehouseError> {
		self.text(index, column)?
			.ok_or(LakehouseError::MissingValue { column })
	}

	/// A cell decoded from its JSON text. Null cells decode to [`Value::Null`].
	pub fn json(&self, index: usize, column: &'static str) -> Result<Value, LakehouseError> {
		match self.text(index, column)? {
			Some(text) => {
				serde_json::from_str(text).map_err(|source| LakehouseError::Decode { column, source })
			}
			None => Ok(Value::Null),
		}
	}
}

/// Error body of a rejected API request (non-2xx).
#[derive(Debug, Deserialize)]
struct ApiError {
	error_code: String,
	#[serde(default)]
	message: String,
}

/// Rows of one chunk and the link to the next chunk, if any.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ResultChunk {
	pub data: ResultRows,
	pub next_chunk_internal_link: Option<String>,
}

impl From<ResultData> for ResultChunk {
	fn from(result: ResultData) -> Self {
		Self {
			data: ResultRows(result.data_array.unwrap_or_default()),
			next_chunk_internal_link: result.next_chunk_internal_link,
		}
	}
}

/// Classifies a response body of the Statement Execution API.
///
/// - A `FAILED` status is an upstream error carrying the reported code and message.
/// - Any other state except `SUCCEEDED` means the statement produced no complete result.
/// - A body with neither a status nor a result (or no JSON at all) is malformed.
/// - Otherwise the inline `data_array` is returned; a missing array means no rows.
pub fn parse_response(body: &str) -> Result<ResultChunk, LakehouseError> {
	let malformed = || LakehouseError::MalformedResponse {
		body: body.to_owned(),
	};

	let response: StatementResponse = serde_json::from_str(body).map_err(|_| malformed())?;

	match &response.status {
		None if response.result.is_none() => return Err(malformed()),
		None => {}
		Some(status) => match status.state {
			StatementState::Succeeded => {}
			StatementState::Failed => {
				let error = status.error.as_ref();
				return Err(LakehouseError::Upstream {
					error_code: error
						.and_then(|e| e.error_code.clone())
						.unwrap_or_else(|| String::from("UNKNOWN")),
					message: error.and_then(|e| e.message.clone()).unwrap_or_default(),
				});
			}
			state => {
				return Err(LakehouseError::Unfinished {
					statement_id: response.statement_id.clone().unwrap_or_default(),
					state,
				});
			}
		},
	}

	Ok(response.result.map(ResultChunk::from).unwrap_or_default())
}

/// Parses the body of `GET {next_chunk_internal_link}`, which is a bare [`ResultData`].
pub fn parse_chunk(body: &str) -> Result<ResultChunk, LakehouseError> {
	serde_json::from_str::<ResultData>(body)
		.map(ResultChunk::from)
		.map_err(|_| LakehouseError::MalformedResponse {
			body: body.to_owned(),
		})
}

/// Executes statements on a single warehouse.
#[derive(Debug, Clone)]
pub struct StatementExecutor {
	http: Client,
	api_base: Url,
	endpoint: Url,
	warehouse_id: String,
	wait_timeout: Duration,
}

impl StatementExecutor {
	pub fn new(
		http: Client,
		api_base: &Url,
		warehouse_id: impl Into<String>,
		wait_timeout: Duration,
	) -> Result<Self, LakehouseError> {
		let endpoint =
			api_base
				.join("sql/statements/")
				.map_err(|source| LakehouseError::InvalidUrl {
					url: api_base.to_string(),
					source,
				})?;

		Ok(Self {
			http,
			api_base: api_base.clone(),
			endpoint,
			warehouse_id: warehouse_id.into(),
			wait_timeout,
		})
	}

	pub fn request<'a>(&'a self, statement: &'a Statement) -> ExecuteStatementRequest<'a> {
		ExecuteStatementRequest {
			warehouse_id: &self.warehouse_id,
			statement: &statement.text,
			parameters: &statement.parameters,
			wait_timeout: format!("{}s", self.wait_timeout.as_secs()),
			on_wait_timeout: OnWaitTimeout::Cancel,
		}
	}

	/// Resolves a chunk link such as `/api/2.0/sql/statements/{id}/result/chunks/1`.
	pub fn chunk_url(&self, link: &str) -> Result<Url, LakehouseError> {
		self.api_base
			.join(link)
			.map_err(|source| LakehouseError::InvalidUrl {
				url: link.to_owned(),
				source,
			})
	}

	/// Reads the body of a response, turning non-2xx responses into errors.
	async fn read_body(response: reqwest::Response) -> Result<String, LakehouseError> {
		let rejection = response.error_for_status_ref().err();
		let body = response.text().await?;

		match rejection {
			None => Ok(body),
			Some(rejection) => Err(match serde_json::from_str::<ApiError>(&body) {
				Ok(error) => LakehouseError::Upstream {
					error_code: error.error_code,
					message: error.message,
				},
				Err(_) => LakehouseError::Transport(rejection),
			}),
		}
	}

	/// Submits a statement and waits for its result, following every result chunk.
	///
	/// The warehouse cancels the statement if it does not finish within the wait timeout, which
	/// surfaces as [`LakehouseError::Unfinished`].
	#[instrument(skip_all, fields(warehouse_id = %self.warehouse_id))]
	pub async fn execute(&self, statement: &Statement) -> Result<ResultRows, LakehouseError> {
		debug!(statement = %statement.text, parameters = statement.parameters.len(), "Submitting statement");

		let response = self
			.http
			.post(self.endpoint.clone())
			.json(&self.request(statement))
			.send()
			.await?;

		let ResultChunk {
			data: mut rows,
			mut next_chunk_internal_link,
		} = parse_response(&Self::read_body(response).await?)?;

		let mut chunks = 1;
		while let Some(link) = next_chunk_internal_link {
			let url = self.chunk_url(&link)?;
			debug!(%url, "Fetching result chunk");

			let response = self.http.get(url).send().await?;
			let chunk = parse_chunk(&Self::read_body(response).await?)?;
			rows.0.extend(chunk.data.0);
			next_chunk_internal_link = chunk.next_chunk_internal_link;
			chunks += 1;
		}

		info!(rows = rows.len(), chunks, "Statement completed");
		Ok(rows)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn request_serialization() {
		let executor = StatementExecutor::new(
			Client::new(),
			&Url::parse("https://example.com/api/2.0/").unwrap(),
			"wh-1",
			Duration::from_secs(30),
		)
		.unwrap();
		let statement = Statement {
			text: String::from("SELECT 1"),
			parameters: Vec::new(),
		};

		assert_eq!(
			serde_json::to_value(executor.request(&statement)).unwrap(),
			json!({
				"warehouse_id": "wh-1",
				"statement": "SELECT 1",
				"wait_timeout": "30s",
				"on_wait_timeout": "CANCEL"
			})
		);
		assert_eq!(
			executor.endpoint.as_str(),
			"https://example.com/api/2.0/sql/statements/"
		);
	}

	#[test]
	fn request_serialization_with_parameters() {
		let executor = StatementExecutor::new(
			Client::new(),
			&Url::parse("https://example.com/api/2.0/").unwrap(),
			"wh-1",
			Duration::from_secs(30),
		)
		.unwrap();
		let statement = Statement {
			text: String::from("SELECT 1 WHERE x = :p0"),
			parameters: vec![StatementParameter {
				name: String::from("p0"),
				value: String::from("CT"),
				kind: "STRING",
			}],
		};

		let request = serde_json::to_value(executor.request(&statement)).unwrap();
		assert_eq!(
			request["parameters"],
			json!([{"name": "p0", "value": "CT", "type": "STRING"}])
		);
	}

	#[test]
	fn failed_status_is_upstream_error() {
		let body = r#"{"status": {"state": "FAILED", "error": {"error_code": "INVALID_PARAMETER_VALUE", "message": "bad table"}}}"#;

		match parse_response(body) {
			Err(LakehouseError::Upstream {
				error_code,
				message,
			}) => {
				assert_eq!(error_code, "INVALID_PARAMETER_VALUE");
				assert_eq!(message, "bad table");
			}
			other => panic!("unexpected outcome: {other:?}"),
		}
	}

	#[test]
	fn missing_status_and_result_is_malformed() {
		let body = r#"{"message": "something else"}"#;
		match parse_response(body) {
			Err(LakehouseError::MalformedResponse { body: raw }) => assert_eq!(raw, body),
			other => panic!("unexpected outcome: {other:?}"),
		}

		assert!(matches!(
			parse_response("<html>gateway</html>"),
			Err(LakehouseError::MalformedResponse { .. })
		));
	}

	#[test]
	fn result_without_status_is_decoded() {
		let body = r#"{"result": {"data_array": [["\"STUDY1\"", "\"SERIES1\"", "\"Chest CT\""]]}}"#;
		let rows = parse_response(body).unwrap().data;

		assert_eq!(rows.len(), 1);
		let row = rows.rows().next().unwrap();
		assert_eq!(row.json(0, "study").unwrap(), json!("STUDY1"));
		assert_eq!(row.json(2, "description").unwrap(), json!("Chest CT"));
	}

	#[test]
	fn missing_data_array_is_empty() {
		let body = r#"{"statement_id": "s-1", "status": {"state": "SUCCEEDED"}, "result": {}}"#;
		assert_eq!(parse_response(body).unwrap(), ResultChunk::default());

		let body = r#"{"statement_id": "s-1", "status": {"state": "SUCCEEDED"}}"#;
		assert_eq!(parse_response(body).unwrap(), ResultChunk::default());

		let body = r#"{"status": {"state": "SUCCEEDED"}, "result": {"data_array": []}}"#;
		assert_eq!(parse_response(body).unwrap(), ResultChunk::default());
	}

	#[test]
	fn unfinished_states_are_errors() {
		for state in ["CANCELED", "CLOSED", "PENDING", "RUNNING", "SOMETHING_NEW"] {
			let body = json!({"statement_id": "s-1", "status": {"state": state}}).to_string();
			assert!(
				matches!(
					parse_response(&body),
					Err(LakehouseError::Unfinished { ref statement_id, .. }) if statement_id == "s-1"
				),
				"{state} should not yield rows"
			);
		}

		match parse_response(r#"{"statement_id": "s-2", "status": {"state": "CANCELED"}}"#) {
			Err(LakehouseError::Unfinished { state, .. }) => {
				assert_eq!(state, StatementState::Canceled);
			}
			other => panic!("unexpected outcome: {other:?}"),
		}
	}

	#[test]
	fn partial_results_of_unfinished_statements_are_not_returned() {
		let body = r#"{"status": {"state": "RUNNING"}, "result": {"data_array": [["a"]]}}"#;
		assert!(matches!(
			parse_response(body),
			Err(LakehouseError::Unfinished {
				state: StatementState::Running,
				..
			})
		));
	}

	#[test]
	fn chunk_links_are_kept() {
		let body = r#"{
			"status": {"state": "SUCCEEDED"},
			"result": {
				"data_array": [["/a", "1"]],
				"next_chunk_internal_link": "/api/2.0/sql/statements/s/result/chunks/1"
			}
		}"#;

		let chunk = parse_response(body).unwrap();
		assert_eq!(chunk.data.len(), 1);
		assert_eq!(
			chunk.next_chunk_internal_link.as_deref(),
			Some("/api/2.0/sql/statements/s/result/chunks/1")
		);
	}

	#[test]
	fn chunk_bodies_are_bare_result_data() {
		let chunk = parse_chunk(
			r#"{"chunk_index": 1, "row_offset": 1, "row_count": 1, "data_array": [["/b", "2"]]}"#,
		)
		.unwrap();

		assert_eq!(
			chunk.data,
			ResultRows::from(vec![vec![Some(String::from("/b")), Some(String::from("2"))]])
		);
		assert_eq!(chunk.next_chunk_internal_link, None);
		assert!(matches!(
			parse_chunk("not json"),
			Err(LakehouseError::MalformedResponse { .. })
		));
	}

	#[test]
	fn chunk_links_resolve_against_the_workspace() {
		let executor = StatementExecutor::new(
			Client::new(),
			&Url::parse("https://example.com/api/2.0/").unwrap(),
			"wh-1",
			Duration::from_secs(30),
		)
		.unwrap();

		assert_eq!(
			executor
				.chunk_url("/api/2.0/sql/statements/s/result/chunks/1")
				.unwrap()
				.as_str(),
			"https://example.com/api/2.0/sql/statements/s/result/chunks/1"
		);
	}

	#[test]
	fn null_cells() {
		let rows = ResultRows::from(vec![vec![Some(String::from("a")), None]]);
		let row = rows.rows().next().unwrap();

		assert_eq!(row.text(0, "a").unwrap(), Some("a"));
		assert_eq!(row.text(1, "b").unwrap(), None);
		assert_eq!(row.json(1, "b").unwrap(), Value::Null);
		assert!(matches!(
			row.required_text(1, "b"),
			Err(LakehouseError::MissingValue { column: "b" })
		));
		assert!(matches!(
			row.text(2, "c"),
			Err(LakehouseError::MissingValue { column: "c" })
		));
		assert!(matches!(
			row.json(0, "a"),
			Err(LakehouseError::Decode { column: "a", .. })
		));
	}
}
