//! Admission errors surfaced by the upgrade handler.

/// Why an upgrade request was refused before any room state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// The request carried no member identity.
    #[error("no member identity was supplied")]
    MissingMember,

    /// The room's status or current membership refused the member.
    #[error("member cannot join the room")]
    Rejected,
}

#[cfg(feature = "websocket")]
impl axum::response::IntoResponse for JoinError {
    fn into_response(self) -> axum::response::Response {
        use axum::response::IntoResponse as _;

        let status = match self {
            JoinError::MissingMember => axum::http::StatusCode::BAD_REQUEST,
            JoinError::Rejected => axum::http::StatusCode::FORBIDDEN,
        };
        (status, self.to_string()).into_response()
    }
}
