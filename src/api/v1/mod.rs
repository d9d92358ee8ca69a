mod error;
mod handler;
mod router;

pub use router::routes;
pub use error::recover_error;
pub use error::{ApiError, ApiErrorCode};
pub use handler::ApiResponse;
