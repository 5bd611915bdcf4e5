pub mod error;
pub mod middleware;
pub mod routes;

pub use error::{ApiError, ErrorResponse};
pub use middleware::log_request_errors;
pub use routes::{GenerateVideoResponse, generate_video, health};
