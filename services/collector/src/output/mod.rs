pub mod bulk;
pub mod http_backend;
pub mod local_sink;

pub use bulk::{BulkBackend, BulkOutput, BulkSubmitError};
pub use http_backend::HttpBulkBackend;
pub use local_sink::{LocalSink, LocalSinkError};
