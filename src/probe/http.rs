//! HTTP probe implementation.

use super::ProbeOutcome;
use crate::db::Target;

use std::error::Error as StdError;
use std::time::{Duration, Instant};

/// Name of the cookie carrying the target's country.
pub const COUNTRY_COOKIE: &str = "countryCode";

/// `Cookie` header value for a country code, e.g. `countryCode=countryCode-US`.
pub fn country_cookie(country_code: &str) -> String {
    format!("{}=countryCode-{}", COUNTRY_COOKIE, country_code)
}

/// Run an HTTP GET probe against the target.
///
/// Elapsed time is measured up to the response headers; the body is not
/// read. The timeout is enforced here even if the client would wait longer.
pub async fn run_http_probe(client: &reqwest::Client, target: &Target, timeout: Duration) -> ProbeOutcome {
    let mut request = client.get(&target.url).timeout(timeout);
    if let Some(cc) = &target.country_code {
        request = request.header(reqwest::header::COOKIE, country_cookie(cc));
    }

    let start = Instant::now();
    let outcome = match tokio::time::timeout(timeout, request.send()).await {
        Err(_) => ProbeOutcome::Timeout,
        Ok(Ok(response)) => ProbeOutcome::Response {
            status: response.status().as_u16(),
            elapsed: start.elapsed(),
        },
        Ok(Err(e)) => classify_error(&e),
    };

    tracing::debug!("Probe {} -> {:?}", target.url, outcome);
    outcome
}

fn classify_error(e: &reqwest::Error) -> ProbeOutcome {
    if e.is_timeout() {
        ProbeOutcome::Timeout
    } else if is_tls_error(e) {
        ProbeOutcome::TlsError
    } else if e.is_connect() {
        ProbeOutcome::ConnectionError
    } else {
        ProbeOutcome::Other(e.to_string())
    }
}

// reqwest has no TLS predicate; handshake and certificate failures only show
// up in the source chain.
fn is_tls_error(e: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = e.source();
    while let Some(err) = source {
        let msg = err.to_string().to_lowercase();
        if ["certificate", "tls", "ssl", "handshake"].iter().any(|k| msg.contains(k)) {
            return true;
        }
        source = err.source();
    }
    false
}
