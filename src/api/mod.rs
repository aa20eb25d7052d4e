//! Client of the remote parse service.
//!
//! The project file is posted as multipart form data to `{base_url}/api/upload`;
//! a 2xx body must carry the parsed project with both graphs.

mod client;
mod transport;
mod types;

pub use client::{backoff_delay, ApiClient, ProjectUploader, UploadOptions};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport, UploadForm};
pub use types::decode_project;
