//! Request signing for token-exchange calls.
//!
//! Exchange endpoints use RPC-style signatures: the query parameters are
//! canonicalized, wrapped into a string-to-sign together with the HTTP
//! method, and keyed with `secret + "&"`.

use std::collections::BTreeMap;
use std::fmt::Debug;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

/// Signature algorithm capability.
pub trait Signer: Send + Sync + Debug {
    /// Value sent as `SignatureMethod`.
    fn method(&self) -> &'static str;

    /// Value sent as `SignatureVersion`.
    fn version(&self) -> &'static str {
        "1.0"
    }

    /// Base64 signature of `string_to_sign` keyed with `secret`.
    fn sign(&self, string_to_sign: &str, secret: &str) -> String;
}

/// HMAC-SHA1 signer.
#[derive(Clone, Copy, Debug, Default)]
pub struct HmacSha1Signer;

impl Signer for HmacSha1Signer {
    fn method(&self) -> &'static str {
        "HMAC-SHA1"
    }

    fn sign(&self, string_to_sign: &str, secret: &str) -> String {
        let mut mac = Hmac::<Sha1>::new_from_slice(signing_key(secret).as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(string_to_sign.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }
}

/// HMAC-SHA256 signer.
#[derive(Clone, Copy, Debug, Default)]
pub struct HmacSha256Signer;

impl Signer for HmacSha256Signer {
    fn method(&self) -> &'static str {
        "HMAC-SHA256"
    }

    fn sign(&self, string_to_sign: &str, secret: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(signing_key(secret).as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(string_to_sign.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }
}

fn signing_key(secret: &str) -> String {
    format!("{}&", secret)
}

/// RFC 3986 percent-encoding; only unreserved characters pass through.
pub fn percent_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Parameters sorted by key, encoded and joined with `&`.
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn string_to_sign(method: &str, params: &BTreeMap<String, String>) -> String {
    format!(
        "{}&{}&{}",
        method,
        percent_encode("/"),
        percent_encode(&canonical_query(params))
    )
}

/// Add `SignatureMethod`/`SignatureVersion`, then sign and add `Signature`.
pub fn sign_params(
    signer: &dyn Signer,
    http_method: &str,
    mut params: BTreeMap<String, String>,
    secret: &str,
) -> BTreeMap<String, String> {
    params.insert("SignatureMethod".into(), signer.method().into());
    params.insert("SignatureVersion".into(), signer.version().into());
    let signature = signer.sign(&string_to_sign(http_method, &params), secret);
    params.insert("Signature".into(), signature);
    params
}
