//! Downloads instances from the file-serving endpoint.

use super::LakehouseError;
use crate::types::UI;
use bytes::Bytes;
use dicom::object::DefaultDicomObject;
use futures::StreamExt;
use reqwest::Client;
use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use url::Url;

/// One instance to retrieve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalRow {
	/// Path of the file within the workspace, e.g. `/Volumes/main/pixels/1.dcm`.
	pub local_path: String,
	pub save_directory: PathBuf,
	pub sop_instance_uid: UI,
}

impl RetrievalRow {
	/// The file the instance is written to: `{save_directory}/{SOPInstanceUID}.dcm`.
	pub fn destination(&self) -> Result<PathBuf, LakehouseError> {
		let file_name = format!("{}.dcm", self.sop_instance_uid);
		// A UID with path separators would escape the save directory.
		if self.sop_instance_uid.is_empty()
			|| Path::new(&file_name).file_name() != Some(OsStr::new(&file_name))
		{
			return Err(LakehouseError::InvalidInstanceUid {
				uid: self.sop_instance_uid.clone(),
			});
		}
		Ok(self.save_directory.join(file_name))
	}
}

/// Parses a downloaded Part 10 file. The 128 byte preamble is optional.
pub fn parse_dicom(content: &[u8]) -> Result<DefaultDicomObject, LakehouseError> {
	const PREAMBLE_LENGTH: usize = 128;

	let data = match content.get(PREAMBLE_LENGTH..PREAMBLE_LENGTH + 4) {
		Some(magic) if magic == b"DICM" => &content[PREAMBLE_LENGTH..],
		_ => content,
	};
	Ok(dicom::object::from_reader(data)?)
}

#[derive(Debug, Clone)]
pub struct FileFetcher {
	http: Client,
	endpoint: Url,
}

impl FileFetcher {
	pub fn new(http: Client, api_base: &Url) -> Result<Self, LakehouseError> {
		let endpoint = api_base
			.join("fs/files")
			.map_err(|source| LakehouseError::InvalidUrl {
				url: api_base.to_string(),
				source,
			})?;

		Ok(Self { http, endpoint })
	}

	/// `GET {api_base}/fs/files{path}` with every path segment percent-encoded.
	pub fn file_url(&self, path: &str) -> Url {
		let mut url = self.endpoint.clone();
		if let Ok(mut segments) = url.path_segments_mut() {
			segments
				.pop_if_empty()
				.extend(path.split('/').filter(|segment| !segment.is_empty()));
		}
		url
	}

	pub async fn fetch(&self, path: &str) -> Result<Bytes, LakehouseError> {
		let url = self.file_url(path);
		debug!(%url, "Fetching file");

		let response = self.http.get(url).send().await?.error_for_status()?;
		Ok(response.bytes().await?)
	}

	/// Downloads one instance into its save directory.
	pub async fn download(&self, row: RetrievalRow) -> Result<PathBuf, LakehouseError> {
		let destination = row.destination()?;
		let content = self.fetch(&row.local_path).await?;

		tokio::fs::write(&destination, &content)
			.await
			.map_err(|source| LakehouseError::FileWrite {
				path: destination.clone(),
				source,
			})?;
		trace!(path = %destination.display(), bytes = content.len(), "Wrote instance");

		Ok(destination)
	}

	/// Downloads one instance and parses it in memory.
	pub async fn load(&self, row: RetrievalRow) -> Result<DefaultDicomObject, LakehouseError> {
		let content = self.fetch(&row.local_path).await?;
		parse_dicom(&content)
	}

	/// Downloads all instances with at most `concurrency` downloads in flight.
	///
	/// Returns the written paths in completion order.
	pub async fn download_all(
		&self,
		rows: Vec<RetrievalRow>,
		concurrency: usize,
	) -> Result<Vec<PathBuf>, LakehouseError> {
		let fetcher = self.clone();
		fan_out(rows, concurrency, move |row| {
			let fetcher = fetcher.clone();
			async move { fetcher.download(row).await }
		})
		.await
	}

	/// Loads all instances with at most `concurrency` downloads in flight.
	pub async fn load_all(
		&self,
		rows: Vec<RetrievalRow>,
		concurrency: usize,
	) -> Result<Vec<DefaultDicomObject>, LakehouseError> {
		let fetcher = self.clone();
		fan_out(rows, concurrency, move |row| {
			let fetcher = fetcher.clone();
			async move { fetcher.load(row).await }
		})
		.await
	}
}

/// Runs one task per item on the runtime, bounded by `concurrency`.
///
/// Every task runs to completion even if another one fails; the first failure in completion
/// order is returned.
async fn fan_out<I, T, F, Fut>(
	items: Vec<I>,
	concurrency: usize,
	task: F,
) -> Result<Vec<T>, LakehouseError>
where
	F: Fn(I) -> Fut,
	Fut: Future<Output = Result<T, LakehouseError>> + Send + 'static,
	T: Send + 'static,
{
	let results: Vec<_> = futures::stream::iter(items)
		.map(|item| tokio::spawn(task(item)))
		.buffer_unordered(concurrency.max(1))
		.collect()
		.await;

	results
		.into_iter()
		.map(|joined| joined.map_err(LakehouseError::Worker).and_then(|result| result))
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn row(sop_instance_uid: &str) -> RetrievalRow {
		RetrievalRow {
			local_path: String::from("/Volumes/main/pixels/a.dcm"),
			save_directory: PathBuf::from("/tmp/series"),
			sop_instance_uid: UI::from(sop_instance_uid),
		}
	}

	#[test]
	fn destination_is_named_after_the_instance() {
		assert_eq!(
			row("1.2.3.4").destination().unwrap(),
			PathBuf::from("/tmp/series/1.2.3.4.dcm")
		);
	}

	#[test]
	fn destination_rejects_path_traversal() {
		for uid in ["", "../1.2.3", "a/b", "/etc/passwd"] {
			assert!(
				matches!(
					row(uid).destination(),
					Err(LakehouseError::InvalidInstanceUid { .. })
				),
				"{uid} should be rejected"
			);
		}
	}

	#[test]
	fn file_urls_are_percent_encoded() {
		let fetcher = FileFetcher::new(
			Client::new(),
			&Url::parse("https://example.com/api/2.0/").unwrap(),
		)
		.unwrap();

		assert_eq!(
			fetcher
				.file_url("/Volumes/main/pixels/series 1/a#1.dcm")
				.as_str(),
			"https://example.com/api/2.0/fs/files/Volumes/main/pixels/series%201/a%231.dcm"
		);
	}

	#[test]
	fn garbage_is_not_dicom() {
		assert!(matches!(
			parse_dicom(b"definitely not a DICOM file"),
			Err(LakehouseError::Dicom(_))
		));
	}

	#[tokio::test]
	async fn fan_out_runs_every_task() {
		let results = fan_out(vec![1, 2, 3, 4, 5], 2, |n: u32| async move {
			Ok::<_, LakehouseError>(n * 10)
		})
		.await
		.unwrap();

		let mut sorted = results;
		sorted.sort_unstable();
		assert_eq!(sorted, vec![10, 20, 30, 40, 50]);
	}

	#[tokio::test]
	async fn fan_out_reports_failure() {
		let result = fan_out(vec![1, 2, 3], 3, |n: u32| async move {
			if n == 2 {
				Err(LakehouseError::MissingValue { column: "n" })
			} else {
				Ok(n)
			}
		})
		.await;

		assert!(matches!(
			result,
			Err(LakehouseError::MissingValue { column: "n" })
		));
	}
}
