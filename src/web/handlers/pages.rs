//! Minimal page handlers rendering from the session view.
//!
//! The site's real templates are composed outside this core; these handlers
//! only prove out the session-gated surface.

use axum::{extract::Extension, response::Html};

use crate::web::session::SessionData;

pub async fn index(session: Extension<SessionData>) -> Html<String> {
    let body = if session.signed_in() {
        format!(
            "<p>Welcome back, {}.</p><a href=\"/profile\">profile</a>",
            session.name
        )
    } else {
        "<p><a href=\"/signin\">sign in</a> or <a href=\"/signup\">sign up</a></p>".to_string()
    };
    page("home", &body)
}

pub async fn profile(session: Extension<SessionData>) -> Html<String> {
    let email = if session.email.is_empty() {
        "unverified"
    } else {
        &session.email
    };
    page(
        "profile",
        &format!(
            "<p>@{} &mdash; {} ({email})</p>",
            session.handle, session.name
        ),
    )
}

pub async fn signin_form(session: Extension<SessionData>) -> Html<String> {
    page("signin", &form_body("/signin", &session))
}

pub async fn signup_form(session: Extension<SessionData>) -> Html<String> {
    page("signup", &form_body("/signup", &session))
}

fn form_body(action: &str, session: &SessionData) -> String {
    let widget = if session.recaptcha_enabled {
        "<div class=\"g-recaptcha\"></div>"
    } else {
        ""
    };
    format!(
        "<form method=\"post\" action=\"{action}\">\
         <input type=\"hidden\" name=\"csrf_token\" value=\"{}\">\
         {widget}\
         </form>",
        session.csrf_token
    )
}

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!doctype html><html><head><title>{title}</title></head><body>{body}</body></html>"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_in() -> SessionData {
        SessionData {
            internal_uid: "01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            handle: "alice".to_string(),
            name: "Alice".to_string(),
            csrf_token: "csrf-1".to_string(),
            ..SessionData::default()
        }
    }

    #[tokio::test]
    async fn index_offers_signin_when_anonymous() {
        let Html(body) = index(Extension(SessionData::default())).await;
        assert!(body.contains("/signin"));
        assert!(body.contains("/signup"));
    }

    #[tokio::test]
    async fn index_greets_signed_in_person() {
        let Html(body) = index(Extension(signed_in())).await;
        assert!(body.contains("Alice"));
        assert!(body.contains("/profile"));
    }

    #[tokio::test]
    async fn profile_marks_unverified_email() {
        let Html(body) = profile(Extension(signed_in())).await;
        assert!(body.contains("unverified"));
    }

    #[tokio::test]
    async fn forms_embed_the_csrf_token() {
        let Html(body) = signin_form(Extension(signed_in())).await;
        assert!(body.contains("csrf-1"));
    }

    #[tokio::test]
    async fn signup_form_toggles_recaptcha_widget() {
        let mut data = SessionData::default();
        data.recaptcha_enabled = true;
        let Html(with_widget) = signup_form(Extension(data)).await;
        assert!(with_widget.contains("g-recaptcha"));

        let Html(without) = signup_form(Extension(SessionData::default())).await;
        assert!(!without.contains("g-recaptcha"));
    }
}
