//! RPC-style request signing (signature version 1.0, HMAC-SHA1).

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use uuid::Uuid;

type HmacSha1 = Hmac<Sha1>;

pub(super) const API_VERSION: &str = "2017-05-25";

/// Percent-encode per RFC 3986: unreserved characters pass through,
/// everything else (including space) is `%XX`.
pub(super) fn percent_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
        .replace('*', "%2A")
        .replace("%7E", "~")
}

/// Sorted `key=value` pairs joined with `&`, both sides encoded.
pub(super) fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

pub(super) fn string_to_sign(method: &str, canonical: &str) -> String {
    format!(
        "{}&{}&{}",
        method,
        percent_encode("/"),
        percent_encode(canonical)
    )
}

/// Base64 HMAC-SHA1 of `text`, keyed with `secret&`.
pub(super) fn sign(secret: &str, text: &str) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha1::new_from_slice(format!("{}&", secret).as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(text.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Signs action parameters with the account's access key.
#[derive(Clone)]
pub(super) struct Signer {
    access_key_id: String,
    access_key_secret: String,
    region_id: String,
}

impl Signer {
    pub(super) fn new(access_key_id: &str, access_key_secret: &str, region_id: &str) -> Self {
        Self {
            access_key_id: access_key_id.to_string(),
            access_key_secret: access_key_secret.to_string(),
            region_id: region_id.to_string(),
        }
    }

    /// Full signed query string for a GET call.
    pub(super) fn signed_query(
        &self,
        action: &str,
        params: BTreeMap<String, String>,
        now: DateTime<Utc>,
        nonce: &str,
    ) -> String {
        let mut all = params;
        let common = [
            ("AccessKeyId", self.access_key_id.as_str()),
            ("Action", action),
            ("Format", "JSON"),
            ("RegionId", self.region_id.as_str()),
            ("SignatureMethod", "HMAC-SHA1"),
            ("SignatureNonce", nonce),
            ("SignatureVersion", "1.0"),
            ("Version", API_VERSION),
        ];
        for (k, v) in common {
            all.insert(k.to_string(), v.to_string());
        }
        all.insert(
            "Timestamp".to_string(),
            now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        );

        let canonical = canonical_query(&all);
        let signature = sign(
            &self.access_key_secret,
            &string_to_sign("GET", &canonical),
        );
        format!("Signature={}&{}", percent_encode(&signature), canonical)
    }

    /// Signed query with a fresh nonce and the current time.
    pub(super) fn sign_now(&self, action: &str, params: BTreeMap<String, String>) -> String {
        let nonce = Uuid::new_v4().to_string();
        self.signed_query(action, params, Utc::now(), &nonce)
    }
}
