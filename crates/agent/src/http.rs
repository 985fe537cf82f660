use std::time::Duration;

use reqwest::{Client, StatusCode};

use callflow_core::errors::Failure;

/// Shared client for one collaborator. The per-request timeout is a backstop;
/// callers also bound each attempt with their retry policy.
pub(crate) fn build_client(timeout: Duration) -> Client {
    Client::builder().timeout(timeout).build().unwrap_or_else(|_| Client::new())
}

/// Classifies a reqwest failure. Body decoding problems are malformed
/// responses; anything that broke the exchange itself is transport.
pub(crate) fn transport_failure(context: &str, error: &reqwest::Error) -> Failure {
    if error.is_timeout() {
        Failure::transport(format!("{context} timed out: {error}"))
    } else if error.is_connect() {
        Failure::transport(format!("{context} could not connect: {error}"))
    } else if error.is_decode() {
        Failure::malformed(format!("{context} could not be decoded: {error}"))
    } else if error.is_builder() {
        Failure::rejected(format!("{context} could not be built: {error}"))
    } else {
        Failure::transport(format!("{context} failed: {error}"))
    }
}

pub(crate) fn status_failure(context: &str, status: StatusCode) -> Failure {
    Failure::status(context, status.as_u16())
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
