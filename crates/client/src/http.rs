//! Shared HTTP client for the REST collaborators

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::Client;
use url::Url;

/// Build the client used for bootstrap and token renewal
///
/// Token renewal relies on a cookie-based credential context, so the client
/// keeps a cookie jar. `refresh_cookie` (`name=value`) seeds it for hosts
/// that obtained the cookie out of band.
pub fn build_client(
    api_url: &Url,
    request_timeout: Duration,
    refresh_cookie: Option<&str>,
) -> Result<Client, reqwest::Error> {
    let jar = Arc::new(Jar::default());
    if let Some(cookie) = refresh_cookie {
        jar.add_cookie_str(cookie, api_url);
    }

    Client::builder()
        .timeout(request_timeout)
        .cookie_provider(jar)
        .build()
}
