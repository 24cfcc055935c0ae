mod compile;
mod health;

pub use compile::*;
pub use health::health_handler;

use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::{HttpRequest, HttpResponse};

/// Rejects malformed bodies with the same payload as a missing `code` field
pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    log::debug!("Rejected compile request body: {err}");
    let response = HttpResponse::BadRequest().json(CompileResponse::failure(NO_CODE_PROVIDED));
    InternalError::from_response(err, response).into()
}
