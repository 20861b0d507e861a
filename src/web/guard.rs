//! Route gates over the per-request session context.
//!
//! Pure predicates on `SessionData::signed_in`; the only effect is the
//! redirect decision.

use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use super::session::SessionData;

/// Anonymous callers are sent to the signin form.
pub async fn require_signed_in(request: Request, next: Next) -> Response {
    if signed_in(&request) {
        next.run(request).await
    } else {
        Redirect::to("/signin").into_response()
    }
}

/// Signed-in callers are sent home.
pub async fn require_signed_out(request: Request, next: Next) -> Response {
    if signed_in(&request) {
        Redirect::to("/").into_response()
    } else {
        next.run(request).await
    }
}

fn signed_in(request: &Request) -> bool {
    request
        .extensions()
        .get::<SessionData>()
        .is_some_and(SessionData::signed_in)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with(data: Option<SessionData>) -> Request {
        let mut request = Request::new(Body::empty());
        if let Some(data) = data {
            request.extensions_mut().insert(data);
        }
        request
    }

    #[test]
    fn anonymous_without_session_data() {
        assert!(!signed_in(&request_with(None)));
    }

    #[test]
    fn anonymous_with_empty_uid() {
        assert!(!signed_in(&request_with(Some(SessionData::default()))));
    }

    #[test]
    fn signed_in_with_uid() {
        let data = SessionData {
            internal_uid: "01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            ..SessionData::default()
        };
        assert!(signed_in(&request_with(Some(data))));
    }
}
