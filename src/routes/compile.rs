use actix_web::{HttpResponse, Responder, post, web};
use serde::{Deserialize, Serialize};

use crate::sandbox::{CompileResult, Sandbox};

pub const NO_CODE_PROVIDED: &str = "No code provided";

/// Inbound payload; `code` is kept loose so wrong types can be reported
#[derive(Deserialize, Debug, Default)]
pub struct CompileRequest {
    #[serde(default)]
    pub code: Option<serde_json::Value>,
}

impl CompileRequest {
    /// Returns the source text if `code` is a non-empty string
    pub fn into_source(self) -> Option<String> {
        match self.code {
            Some(serde_json::Value::String(code)) if !code.is_empty() => Some(code),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct CompileResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompileResponse {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

impl From<CompileResult> for CompileResponse {
    fn from(result: CompileResult) -> Self {
        match result {
            CompileResult::Success { output } => Self {
                success: true,
                output: Some(output),
                error: None,
            },
            CompileResult::Failure { message, .. } => Self::failure(message),
        }
    }
}

#[post("/api/compile")]
pub async fn compile_handler(
    sandbox: web::Data<Sandbox>,
    body: web::Json<CompileRequest>,
) -> impl Responder {
    let Some(source) = body.into_inner().into_source() else {
        return HttpResponse::BadRequest().json(CompileResponse::failure(NO_CODE_PROVIDED));
    };

    match sandbox.compile_and_run(&source).await {
        Ok(result) => {
            if let CompileResult::Failure { reason, .. } = &result {
                log::info!("Compile request finished with {}", reason.label());
            } else {
                log::info!("Compile request finished successfully");
            }
            HttpResponse::Ok().json(CompileResponse::from(result))
        }
        Err(e) => {
            log::error!("Compile request failed: {e:?}");
            HttpResponse::Ok().json(CompileResponse::failure(format!("Server Error: {e}")))
        }
    }
}
