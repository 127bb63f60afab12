use anyhow::Context;
use clap::{Parser, Subcommand};
use dicom_lakehouse::api::qido::{SeriesSearchFilters, StudySearchQuery};
use dicom_lakehouse::api::wado::{RetrieveSeriesRequest, RetrievedSeries};
use dicom_lakehouse::config::AppConfig;
use dicom_lakehouse::{DicomWebClient, LakehouseClient};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Searches and retrieves DICOM series stored in a lakehouse pixels table.
///
/// Connection settings are read from `config.toml` (or the file given with `--config`) and
/// environment variables prefixed with `DICOM_LAKEHOUSE_`, e.g.
/// `DICOM_LAKEHOUSE_LAKEHOUSE__TOKEN`.
#[derive(Parser, Debug)]
#[command(name = "dicom-lakehouse", version)]
struct Args {
	/// Path to a TOML configuration file.
	#[arg(long, short, env = "DICOM_LAKEHOUSE_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Search for series.
	Search {
		/// Restrict the search to a modality, e.g. `CT`.
		#[arg(long)]
		modality: Option<String>,
		#[arg(long)]
		series_instance_uid: Option<String>,
	},
	/// Search for studies.
	Studies {
		/// Case-insensitive substring of the patient name.
		#[arg(long)]
		patient_name: Option<String>,
		/// Prefix of the patient ID.
		#[arg(long)]
		patient_id: Option<String>,
		/// Prefix of the accession number.
		#[arg(long)]
		accession_number: Option<String>,
		/// Case-insensitive substring of the study description.
		#[arg(long)]
		study_description: Option<String>,
		/// Match studies containing any of these modalities. May be repeated.
		#[arg(long = "modality")]
		modalities: Vec<String>,
		/// Earliest study date (YYYYMMDD), inclusive.
		#[arg(long)]
		start_date: Option<String>,
		/// Latest study date (YYYYMMDD), inclusive.
		#[arg(long)]
		end_date: Option<String>,
		#[arg(long)]
		limit: Option<usize>,
		#[arg(long)]
		offset: Option<usize>,
	},
	/// List the series of a study.
	Series { study_instance_uid: String },
	/// Retrieve all instances of a series.
	Retrieve {
		study_instance_uid: String,
		series_instance_uid: String,
		/// Directory that receives the instances.
		#[arg(long, default_value = ".")]
		save_dir: PathBuf,
	},
	/// Print the Referenced Series Sequence of the instances of a series.
	Metadata {
		study_instance_uid: String,
		series_instance_uid: String,
	},
	/// Print the metadata of every instance of a study, grouped by series.
	StudyMetadata { study_instance_uid: String },
}

fn init_logger(level: tracing::Level) {
	// Results go to stdout, so logs are written to stderr.
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::fmt::layer()
				.compact()
				.with_ansi(true)
				.with_file(false)
				.with_line_number(false)
				.with_target(false)
				.with_writer(std::io::stderr),
		)
		.with(
			EnvFilter::builder()
				.with_default_directive(LevelFilter::from_level(level).into())
				.from_env_lossy(),
		)
		.with(sentry::integrations::tracing::layer())
		.init();
}

fn init_sentry(config: &AppConfig) -> sentry::ClientInitGuard {
	let guard = sentry::init((
		// An empty string will disable Sentry
		config.telemetry.sentry.as_deref().unwrap_or_default(),
		sentry::ClientOptions {
			release: sentry::release_name!(),
			traces_sample_rate: 1.0,
			..Default::default()
		},
	));

	if let Some(dsn) = &config.telemetry.sentry {
		info!(dsn, "Enabled Sentry for tracing and error tracking");
	}

	guard
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
	let args = Args::parse();
	let config = AppConfig::new(args.config.as_deref())?;
	init_logger(config.telemetry.level);

	// Sentry must be initialized before the Tokio runtime is created.
	// See https://docs.sentry.io/platforms/rust/#async-main-function
	let sentry = init_sentry(&config);

	let outcome = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()?
		.block_on(run(config, args.command));

	Ok(report(outcome, sentry))
}

/// Logs a failed run and closes the Sentry client so the error event is sent before exiting.
fn report(outcome: anyhow::Result<()>, sentry: sentry::ClientInitGuard) -> ExitCode {
	let code = match outcome {
		Ok(()) => ExitCode::SUCCESS,
		Err(error) => {
			error!("{error:#}");
			ExitCode::FAILURE
		}
	};
	drop(sentry);
	code
}

async fn run(config: AppConfig, command: Command) -> anyhow::Result<()> {
	let client = LakehouseClient::new(&config.lakehouse).context("invalid lakehouse configuration")?;

	match command {
		Command::Search {
			modality,
			series_instance_uid,
		} => {
			let filters = SeriesSearchFilters {
				modality,
				series_instance_uid,
			};
			print_json(&client.search(filters).await?)
		}
		Command::Studies {
			patient_name,
			patient_id,
			accession_number,
			study_description,
			modalities,
			start_date,
			end_date,
			limit,
			offset,
		} => {
			let query = StudySearchQuery {
				patient_name,
				patient_id,
				accession_number,
				study_description,
				modalities_in_study: modalities,
				start_date,
				end_date,
				limit,
				offset,
			};
			print_json(&client.search_for_studies(query).await?)
		}
		Command::Series { study_instance_uid } => print_json(
			&client
				.search_for_series_in_study(&study_instance_uid)
				.await?,
		),
		Command::Retrieve {
			study_instance_uid,
			series_instance_uid,
			save_dir,
		} => {
			let request = RetrieveSeriesRequest::new(study_instance_uid, series_instance_uid, save_dir);
			match client.retrieve_series(request).await? {
				RetrievedSeries::Written(paths) => print_json(&paths),
				RetrievedSeries::Loaded(objects) => {
					let uids: Vec<&str> = objects
						.iter()
						.map(|object| {
							object
								.meta()
								.media_storage_sop_instance_uid()
								.trim_end_matches('\0')
						})
						.collect();
					print_json(&uids)
				}
			}
		}
		Command::Metadata {
			study_instance_uid,
			series_instance_uid,
		} => print_json(
			&client
				.retrieve_series_metadata(&study_instance_uid, &series_instance_uid)
				.await?,
		),
		Command::StudyMetadata { study_instance_uid } => print_json(
			&client
				.retrieve_study_metadata(&study_instance_uid)
				.await?,
		),
	}
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
	let mut stdout = std::io::stdout().lock();
	serde_json::to_writer_pretty(&mut stdout, value)?;
	writeln!(stdout)?;
	Ok(())
}
