use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// Error taxonomy for the ledger engine.
///
/// Validation failures and integrity-guard rejections never leave partial
/// writes behind: multi-step sequences run inside one transaction and roll
/// back fully on the first failure.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Bad input: missing/invalid member, non-positive amount, malformed
    /// date, principal exceeding every loan tier, unparseable setting value.
    #[error("{0}")]
    Validation(String),

    /// Rejected before any mutation: deleting entities with dependent
    /// records, editing a penalty amount below its paid total, touching
    /// system-generated rows.
    #[error("{0}")]
    Integrity(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        LedgerError::Validation(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        LedgerError::Integrity(msg.into())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            LedgerError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            LedgerError::Integrity(msg) => (StatusCode::CONFLICT, msg.clone()),
            LedgerError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not found", what)),
            LedgerError::Database(e) => {
                error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_distinct_status_codes() {
        let cases = [
            (LedgerError::validation("bad amount").into_response(), StatusCode::BAD_REQUEST),
            (LedgerError::integrity("has records").into_response(), StatusCode::CONFLICT),
            (LedgerError::NotFound("loan").into_response(), StatusCode::NOT_FOUND),
            (
                LedgerError::Database(sqlx::Error::RowNotFound).into_response(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (response, expected) in cases {
            assert_eq!(response.status(), expected);
        }
    }
}
