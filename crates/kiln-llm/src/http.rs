//! Shared HTTP client construction.

use std::time::Duration;

/// Create the HTTP client used for model-service calls.
///
/// Config: 30s connect timeout, optional request timeout, rustls TLS,
/// `kiln/{version}` user-agent.
#[must_use]
pub fn default_client(request_timeout: Option<Duration>) -> reqwest::Client {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .user_agent(concat!("kiln/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = request_timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .expect("default HTTP client construction must not fail")
}
