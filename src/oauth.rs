//! OAuth 1.0a request signing (RFC 5849, HMAC-SHA1).
//!
//! The upstream streaming API only accepts signed requests. Signing covers
//! the query/body parameters (`delimited`, `track`) together with the
//! `oauth_*` protocol parameters, so the caller must pass every request
//! parameter it intends to send.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rand::Rng as _;
use rand::distributions::Alphanumeric;
use ring::hmac;

/// The four credentials of an OAuth 1.0a client.
#[derive(Clone)]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field("access_token_secret", &"<redacted>")
            .finish()
    }
}

/// Build the `Authorization: OAuth ...` header value for one request.
///
/// `request_params` are the non-OAuth parameters of the request (query
/// parameters for GET, form fields for POST). `url` must not carry a query
/// string; pass those parameters through `request_params` instead.
pub fn authorization_header(
    credentials: &Credentials,
    method: &str,
    url: &str,
    request_params: &[(String, String)],
) -> String {
    let nonce: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    sign_request(credentials, method, url, request_params, &nonce, timestamp)
}

fn sign_request(
    credentials: &Credentials,
    method: &str,
    url: &str,
    request_params: &[(String, String)],
    nonce: &str,
    timestamp: u64,
) -> String {
    let oauth_params = [
        ("oauth_consumer_key", credentials.consumer_key.clone()),
        ("oauth_nonce", nonce.to_owned()),
        ("oauth_signature_method", "HMAC-SHA1".to_owned()),
        ("oauth_timestamp", timestamp.to_string()),
        ("oauth_token", credentials.access_token.clone()),
        ("oauth_version", "1.0".to_owned()),
    ];

    let mut all_params: Vec<(String, String)> = request_params.to_vec();
    all_params.extend(oauth_params.iter().map(|(k, v)| ((*k).to_owned(), v.clone())));

    let base = signature_base_string(method, url, &all_params);
    let signature = sign(&base, credentials);

    let mut header = String::from("OAuth ");
    for (i, (key, value)) in oauth_params
        .iter()
        .map(|(k, v)| (*k, v.as_str()))
        .chain([("oauth_signature", signature.as_str())])
        .enumerate()
    {
        if i > 0 {
            header.push_str(", ");
        }
        header.push_str(key);
        header.push_str("=\"");
        header.push_str(&percent_encode(value));
        header.push('"');
    }
    header
}

/// RFC 3986 unreserved characters stay literal; everything else is encoded.
const ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, ENCODE_SET).to_string()
}

/// The signature base string: method, URL, and the encoded-then-sorted
/// parameter list, each component percent-encoded and joined with `&`.
fn signature_base_string(method: &str, url: &str, params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();
    let param_string = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(url),
        percent_encode(&param_string)
    )
}

fn sign(base: &str, credentials: &Credentials) -> String {
    let signing_key = format!(
        "{}&{}",
        percent_encode(&credentials.consumer_secret),
        percent_encode(&credentials.access_token_secret)
    );
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, signing_key.as_bytes());
    let tag = hmac::sign(&key, base.as_bytes());
    BASE64.encode(tag.as_ref())
}
