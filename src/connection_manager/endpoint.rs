use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::config::EndpointConfig;

/// Characters left as-is by JavaScript's `encodeURIComponent`
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Endpoint URL with the token embedded as the `token` query parameter
pub fn notification_url(endpoint: &EndpointConfig, token: &str) -> String {
    format!(
        "{}?token={}",
        endpoint.base_url(),
        utf8_percent_encode(token, URI_COMPONENT)
    )
}
