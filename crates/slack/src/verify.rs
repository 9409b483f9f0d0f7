//! Slack request signing (v0 scheme).
//!
//! Slack sends `X-Slack-Request-Timestamp` and `X-Slack-Signature: v0=<hex>`,
//! where the hex digest is `HMAC-SHA256(signing_secret, "v0:{timestamp}:{body}")`.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
pub const SIGNATURE_HEADER: &str = "x-slack-signature";
pub const TEST_MODE_HEADER: &str = "x-test-mode";

const SIGNATURE_VERSION: &str = "v0";
const DEFAULT_TOLERANCE_SECONDS: i64 = 5 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("missing header `{0}`")]
    MissingHeader(&'static str),
    #[error("request timestamp is not a unix epoch value")]
    InvalidTimestamp,
    #[error("request timestamp is outside the {0}s replay window")]
    StaleTimestamp(i64),
    #[error("signature is not in `v0=<hex>` form")]
    MalformedSignature,
    #[error("signature does not match request body")]
    SignatureMismatch,
    #[error("no signing secret is configured")]
    MissingSecret,
}

/// Decides whether an inbound webhook may be processed. Returns the body that
/// should be parsed.
pub trait RequestAuthenticator: Send + Sync {
    fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<Vec<u8>, VerificationError>;
}

pub struct SlackSignatureVerifier {
    signing_secret: SecretString,
    allow_test_mode: bool,
    tolerance_seconds: i64,
}

impl SlackSignatureVerifier {
    pub fn new(signing_secret: SecretString, allow_test_mode: bool) -> Self {
        Self { signing_secret, allow_test_mode, tolerance_seconds: DEFAULT_TOLERANCE_SECONDS }
    }

    pub fn verify_at(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Vec<u8>, VerificationError> {
        if self.allow_test_mode && is_test_mode(headers) {
            return Ok(body.to_vec());
        }

        let secret = self.signing_secret.expose_secret();
        if secret.is_empty() {
            return Err(VerificationError::MissingSecret);
        }

        let timestamp = header_str(headers, TIMESTAMP_HEADER)?;
        let signature = header_str(headers, SIGNATURE_HEADER)?;

        let issued_at =
            timestamp.trim().parse::<i64>().map_err(|_| VerificationError::InvalidTimestamp)?;
        if now.timestamp().abs_diff(issued_at) > self.tolerance_seconds.unsigned_abs() {
            return Err(VerificationError::StaleTimestamp(self.tolerance_seconds));
        }

        let expected = signature
            .strip_prefix("v0=")
            .and_then(|digest| hex::decode(digest).ok())
            .ok_or(VerificationError::MalformedSignature)?;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| VerificationError::MissingSecret)?;
        mac.update(base_string(timestamp, body).as_slice());
        mac.verify_slice(&expected).map_err(|_| VerificationError::SignatureMismatch)?;

        Ok(body.to_vec())
    }
}

impl RequestAuthenticator for SlackSignatureVerifier {
    fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<Vec<u8>, VerificationError> {
        self.verify_at(headers, body, Utc::now())
    }
}

/// `v0=<hex>` signature Slack would send for `body` at `timestamp`.
pub fn sign(signing_secret: &str, timestamp: &str, body: &[u8]) -> String {
    let digest = HmacSha256::new_from_slice(signing_secret.as_bytes())
        .map(|mut mac| {
            mac.update(base_string(timestamp, body).as_slice());
            hex::encode(mac.finalize().into_bytes())
        })
        .unwrap_or_default();
    format!("{SIGNATURE_VERSION}={digest}")
}

fn base_string(timestamp: &str, body: &[u8]) -> Vec<u8> {
    let mut base = Vec::with_capacity(timestamp.len() + body.len() + 4);
    base.extend_from_slice(SIGNATURE_VERSION.as_bytes());
    base.push(b':');
    base.extend_from_slice(timestamp.as_bytes());
    base.push(b':');
    base.extend_from_slice(body);
    base
}

fn is_test_mode(headers: &HeaderMap) -> bool {
    headers
        .get(TEST_MODE_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim() == "true")
}

fn header_str<'a>(
    headers: &'a HeaderMap,
    name: &'static str,
) -> Result<&'a str, VerificationError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .ok_or(VerificationError::MissingHeader(name))
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue};
    use chrono::{TimeZone, Utc};

    use super::{
        sign, RequestAuthenticator, SlackSignatureVerifier, VerificationError, SIGNATURE_HEADER,
        TEST_MODE_HEADER, TIMESTAMP_HEADER,
    };

    const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";
    const BODY: &[u8] = b"token=xyzz0WbapA4vBCDEFasx0q6G&user_id=U1&text=test";

    fn verifier(allow_test_mode: bool) -> SlackSignatureVerifier {
        SlackSignatureVerifier::new(SECRET.to_string().into(), allow_test_mode)
    }

    fn signed_headers(timestamp: i64, body: &[u8]) -> HeaderMap {
        let timestamp = timestamp.to_string();
        let mut headers = HeaderMap::new();
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from_str(&timestamp).expect("header"));
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&sign(SECRET, &timestamp, body)).expect("header"),
        );
        headers
    }

    fn now() -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_531_420_618, 0).single().expect("valid timestamp")
    }

    #[test]
    fn signature_matches_slack_reference_vector() {
        let body = b"token=xyzz0WbapA4vBCDEFasx0q6G&team_id=T1DC2JH3J&team_domain=testteamnow&channel_id=G8PSS9T3V&channel_name=foobar&user_id=U2CERLKJA&user_name=roadrunner&command=%2Fwebhook-collect&text=&response_url=https%3A%2F%2Fhooks.slack.com%2Fcommands%2FT1DC2JH3J%2F397700885554%2F96rGlfmibIGlgcZRskXaIFfN&trigger_id=398738663015.47445629121.803a0bc887a14d10d2c447fce8b6703c";

        assert_eq!(
            sign(SECRET, "1531420618", body),
            "v0=a2114d57b48eac39b9ad189dd8316235a7b4a8d21a10bd27519666489c69b503"
        );
    }

    #[test]
    fn accepts_correctly_signed_request() {
        let headers = signed_headers(now().timestamp(), BODY);

        let body = verifier(false).verify_at(&headers, BODY, now()).expect("verified");

        assert_eq!(body, BODY);
    }

    #[test]
    fn rejects_tampered_body() {
        let headers = signed_headers(now().timestamp(), BODY);

        let result = verifier(false).verify_at(&headers, b"user_id=U2&text=test", now());

        assert_eq!(result, Err(VerificationError::SignatureMismatch));
    }

    #[test]
    fn rejects_stale_and_future_timestamps() {
        let stale = signed_headers(now().timestamp() - 301, BODY);
        let future = signed_headers(now().timestamp() + 301, BODY);
        let edge = signed_headers(now().timestamp() - 300, BODY);

        assert_eq!(
            verifier(false).verify_at(&stale, BODY, now()),
            Err(VerificationError::StaleTimestamp(300))
        );
        assert_eq!(
            verifier(false).verify_at(&future, BODY, now()),
            Err(VerificationError::StaleTimestamp(300))
        );
        assert!(verifier(false).verify_at(&edge, BODY, now()).is_ok());
    }

    #[test]
    fn rejects_extreme_timestamps_as_stale() {
        for timestamp in [i64::MIN, i64::MAX] {
            let headers = signed_headers(timestamp, BODY);

            assert_eq!(
                verifier(false).verify_at(&headers, BODY, now()),
                Err(VerificationError::StaleTimestamp(300))
            );
        }
    }

    #[test]
    fn rejects_missing_and_malformed_headers() {
        let mut headers = signed_headers(now().timestamp(), BODY);
        headers.remove(SIGNATURE_HEADER);
        assert_eq!(
            verifier(false).verify_at(&headers, BODY, now()),
            Err(VerificationError::MissingHeader(SIGNATURE_HEADER))
        );

        assert_eq!(
            verifier(false).verify_at(&HeaderMap::new(), BODY, now()),
            Err(VerificationError::MissingHeader(TIMESTAMP_HEADER))
        );

        let mut headers = signed_headers(now().timestamp(), BODY);
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("v1=abcd"));
        assert_eq!(
            verifier(false).verify_at(&headers, BODY, now()),
            Err(VerificationError::MalformedSignature)
        );

        let mut headers = signed_headers(now().timestamp(), BODY);
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from_static("yesterday"));
        assert_eq!(
            verifier(false).verify_at(&headers, BODY, now()),
            Err(VerificationError::InvalidTimestamp)
        );
    }

    #[test]
    fn test_mode_header_bypasses_only_when_allowed() {
        let mut headers = HeaderMap::new();
        headers.insert(TEST_MODE_HEADER, HeaderValue::from_static("true"));

        assert_eq!(verifier(true).verify(&headers, BODY), Ok(BODY.to_vec()));
        assert_eq!(
            verifier(false).verify(&headers, BODY),
            Err(VerificationError::MissingHeader(TIMESTAMP_HEADER))
        );
    }

    #[test]
    fn empty_secret_rejects_signed_requests() {
        let verifier = SlackSignatureVerifier::new(String::new().into(), true);
        let headers = signed_headers(now().timestamp(), BODY);

        assert_eq!(
            verifier.verify_at(&headers, BODY, now()),
            Err(VerificationError::MissingSecret)
        );
    }
}
