//! Local library side of bookdrop: placing finished downloads in the ingest
//! folder, and handing them to a cloud uploader with vault credentials.

pub mod ingest;
pub mod upload;

pub use ingest::{sanitize_filename, IngestError, IngestSettings, Library};
pub use upload::{CommandUploader, UploadCoordinator, UploadError};
