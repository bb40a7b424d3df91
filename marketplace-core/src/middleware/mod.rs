pub mod metrics;
pub mod security_headers;
pub mod tracing;

pub use self::metrics::{install_recorder, metrics_middleware, render_recorder};
pub use self::security_headers::security_headers_middleware;
pub use self::tracing::{RequestId, request_id_middleware};
