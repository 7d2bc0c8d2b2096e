//! HTML pages

use axum::http::StatusCode;
use maud::{DOCTYPE, Markup, html};
use oidc_auth::Session;

fn layout(title: &str, body: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (title) }
            }
            body { (body) }
        }
    }
}

pub fn home_page() -> Markup {
    layout(
        "OIDC demo",
        html! {
            h1 { "Welcome" }
            p { "You are not signed in." }
            a href="/login" { "Log in" }
        },
    )
}

pub fn profile_page(session: &Session) -> Markup {
    let display_name = session
        .claims
        .get("name")
        .or_else(|| session.claims.get("preferred_username"))
        .and_then(|v| v.as_str())
        .unwrap_or(&session.sub);
    let claims = serde_json::to_string_pretty(&session.claims).unwrap_or_default();

    layout(
        "Profile",
        html! {
            h1 { "Hello, " (display_name) }
            p { "Subject: " code { (session.sub) } }
            h2 { "Claims" }
            pre { (claims) }
            form method="post" action="/logout" {
                button type="submit" { "Log out" }
            }
        },
    )
}

pub fn error_page(status: StatusCode, message: &str, offer_retry: bool) -> Markup {
    let title = status.canonical_reason().unwrap_or("Error");
    layout(
        title,
        html! {
            h1 { (status.as_u16()) " " (title) }
            p { (message) }
            @if offer_retry {
                a href="/login" { "Try again" }
            } @else {
                a href="/" { "Home" }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> Session {
        Session {
            sid: "sid-1".into(),
            sub: "user-1".into(),
            iat: 0,
            exp: 3600,
            claims: json!({"name": "<Ada>", "email": "ada@example.com"})
                .as_object()
                .cloned()
                .unwrap(),
        }
    }

    #[test]
    fn home_links_to_login() {
        assert!(home_page().into_string().contains("href=\"/login\""));
    }

    #[test]
    fn profile_escapes_claim_values() {
        let html = profile_page(&session()).into_string();
        assert!(html.contains("Hello, &lt;Ada&gt;"));
        assert!(!html.contains("<Ada>"));
        assert!(html.contains("ada@example.com"));
        assert!(html.contains("user-1"));
    }

    #[test]
    fn error_page_offers_retry() {
        let html = error_page(StatusCode::BAD_REQUEST, "login expired, retry", true).into_string();
        assert!(html.contains("400 Bad Request"));
        assert!(html.contains("login expired, retry"));
        assert!(html.contains("href=\"/login\""));
    }
}
