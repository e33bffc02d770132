//! Admin session cookie: set on login, cleared on logout.

use std::time::Duration;

use axum_extra::extract::cookie::{Cookie, SameSite};

/// Cookie carrying the signed admin token.
pub const ADMIN_COOKIE: &str = "admin_token";

/// Build the httpOnly admin session cookie.
pub fn admin_cookie(token: String, max_age: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((ADMIN_COOKIE, token))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::seconds(max_age.as_secs() as i64))
        .build()
}

/// Build an expired cookie that clears the admin session.
pub fn clear_admin_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((ADMIN_COOKIE, ""))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::ZERO)
        .build()
}
