use reqwest::header::{
    AUTHORIZATION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HeaderMap, LOCATION,
};
use reqwest::{Method, StatusCode};
use url::Url;

use super::TransportError;

pub fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// A redirect status that carries a `Location` to follow. Other 3xx
/// responses are returned to the caller as-is.
pub fn should_follow(status: StatusCode, headers: &HeaderMap) -> bool {
    is_redirect(status) && headers.contains_key(LOCATION)
}

/// Method for the follow-up request and whether the body survives.
///
/// 301/302/303 turn POST, PUT and DELETE into a body-less GET; 307/308 keep
/// both.
pub fn redirect_method(status: StatusCode, method: &Method) -> (Method, bool) {
    let rewrites = matches!(
        status,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER
    );
    if rewrites && matches!(*method, Method::POST | Method::PUT | Method::DELETE) {
        (Method::GET, false)
    } else {
        (method.clone(), true)
    }
}

/// Resolve the `Location` header against the current URL.
pub fn next_location(current: &Url, headers: &HeaderMap) -> Result<Url, TransportError> {
    let location = headers
        .get(LOCATION)
        .ok_or_else(|| TransportError::InvalidUrl(format!("redirect from {current} without Location")))?
        .to_str()
        .map_err(|_| TransportError::InvalidUrl(format!("non-ASCII Location from {current}")))?;
    current
        .join(location)
        .map_err(|e| TransportError::InvalidUrl(format!("{location}: {e}")))
}

/// Adjust request headers for the next hop.
pub fn strip_headers(headers: &mut HeaderMap, keep_body: bool, from: &Url, to: &Url) {
    if !keep_body {
        headers.remove(CONTENT_TYPE);
        headers.remove(CONTENT_LENGTH);
        headers.remove(CONTENT_ENCODING);
    }
    if from.host_str() != to.host_str() {
        headers.remove(AUTHORIZATION);
        headers.remove(COOKIE);
    }
}
