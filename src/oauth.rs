//! OAuth 1.0a request signing (HMAC-SHA1), user context.
//!
//! Only query-string and form parameters take part in the signature; JSON
//! and multipart bodies do not, which covers every call the bot makes.

use crate::config::TwitterCredentials;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use itertools::Itertools;
use rand::{Rng, distr::Alphanumeric};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// RFC 3986 percent-encoding, as OAuth requires.
fn enc(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// Per-request values that must be unique (nonce) and current (timestamp).
#[derive(Debug, Clone)]
pub struct Nonce {
    pub nonce: String,
    pub timestamp: i64,
}

impl Nonce {
    pub fn fresh() -> Self {
        let nonce = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        Self {
            nonce,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Compute the `oauth_signature` for a request.
///
/// `url` must not carry a query string; pass query and form pairs in `params`.
pub fn signature(
    creds: &TwitterCredentials,
    method: &str,
    url: &str,
    params: &[(&str, &str)],
    nonce: &Nonce,
) -> String {
    let timestamp = nonce.timestamp.to_string();
    let oauth_params = [
        ("oauth_consumer_key", creds.consumer_key.as_str()),
        ("oauth_nonce", nonce.nonce.as_str()),
        ("oauth_signature_method", "HMAC-SHA1"),
        ("oauth_timestamp", timestamp.as_str()),
        ("oauth_token", creds.access_token.as_str()),
        ("oauth_version", "1.0"),
    ];

    let param_string = params
        .iter()
        .chain(oauth_params.iter())
        .map(|(k, v)| (enc(k), enc(v)))
        .sorted()
        .map(|(k, v)| format!("{k}={v}"))
        .join("&");

    let base = format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        enc(url),
        enc(&param_string)
    );
    let key = format!("{}&{}", enc(&creds.consumer_secret), enc(&creds.access_secret));

    let mut mac = HmacSha1::new_from_slice(key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(base.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Build the `Authorization` header value for a request.
pub fn authorization_header(
    creds: &TwitterCredentials,
    method: &str,
    url: &str,
    params: &[(&str, &str)],
    nonce: &Nonce,
) -> String {
    let sig = signature(creds, method, url, params, nonce);
    let timestamp = nonce.timestamp.to_string();
    let fields = [
        ("oauth_consumer_key", creds.consumer_key.as_str()),
        ("oauth_nonce", nonce.nonce.as_str()),
        ("oauth_signature", sig.as_str()),
        ("oauth_signature_method", "HMAC-SHA1"),
        ("oauth_timestamp", timestamp.as_str()),
        ("oauth_token", creds.access_token.as_str()),
        ("oauth_version", "1.0"),
    ];
    let joined = fields
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", enc(k), enc(v)))
        .join(", ");
    format!("OAuth {joined}")
}
