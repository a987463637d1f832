use serde::Deserialize;

use crate::error::ApiError;

/// Every site endpoint answers with `{"code": 0, "msg": "...", "data": ...}`.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Unwraps the envelope, turning a non-zero `code` into a rejection.
    pub fn into_result(self) -> Result<Option<T>, ApiError> {
        if self.code != 0 {
            let msg = if self.msg.is_empty() {
                "request failed".to_string()
            } else {
                self.msg
            };
            return Err(ApiError::Rejected {
                code: self.code,
                msg,
            });
        }
        Ok(self.data)
    }

    /// Like [`ApiResponse::into_result`] but the payload is mandatory.
    pub fn into_data(self, endpoint: &'static str) -> Result<T, ApiError> {
        self.into_result()?.ok_or(ApiError::MissingData(endpoint))
    }
}
