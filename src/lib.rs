//! A DICOMweb-compatible client for DICOM series stored in a SQL lakehouse.
//!
//! Series and studies are searched with parameterized SQL statements against a pixels table whose
//! `meta` column holds the DICOM JSON of each instance. Instances are downloaded through the
//! workspace's file-serving endpoint.

pub mod api;
pub mod backend;
pub mod blocking;
pub mod config;
pub mod types;

pub use api::DicomWebClient;
pub use backend::lakehouse::{LakehouseClient, LakehouseError};
pub use blocking::LakehouseImagingClient;
