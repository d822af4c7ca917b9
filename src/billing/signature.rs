use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Parsed `Stripe-Signature` header: `t=<unix>,v1=<hex>[,v1=<hex>...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeSignature {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,
    #[error("malformed signature header")]
    Malformed,
    #[error("no v1 signature in header")]
    NoV1Signature,
    #[error("webhook secret not configured")]
    SecretMissing,
    #[error("timestamp outside tolerance")]
    TimestampExpired,
    #[error("signature mismatch")]
    Mismatch,
}

impl StripeSignature {
    pub fn parse(header: &str) -> Result<Self, SignatureError> {
        let header = header.trim();
        if header.is_empty() {
            return Err(SignatureError::Missing);
        }

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                return Err(SignatureError::Malformed);
            };
            match key {
                "t" => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| SignatureError::Malformed)?)
                }
                "v1" => signatures.push(value.to_string()),
                // v0 and future schemes are ignored
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
        if signatures.is_empty() {
            return Err(SignatureError::NoV1Signature);
        }
        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

// key: billing-webhook-signature -> HMAC-SHA256 over "{t}.{body}"
pub fn verify_signature(
    secret: &str,
    raw_body: &[u8],
    header: &str,
    tolerance_secs: i64,
    now_unix: i64,
) -> Result<StripeSignature, SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::SecretMissing);
    }
    let signature = StripeSignature::parse(header)?;
    let tolerance = u64::try_from(tolerance_secs).unwrap_or(0);
    if now_unix.abs_diff(signature.timestamp) > tolerance {
        return Err(SignatureError::TimestampExpired);
    }

    let timestamp = signature.timestamp.to_string();
    for candidate in &signature.signatures {
        let Ok(provided) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| SignatureError::SecretMissing)?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(raw_body);
        // verify_slice compares in constant time
        if mac.verify_slice(&provided).is_ok() {
            return Ok(signature);
        }
    }

    Err(SignatureError::Mismatch)
}

/// Produce a header value the way the provider does; used by tests and local tooling.
pub fn sign_payload(secret: &str, raw_body: &[u8], timestamp: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can use any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    )
}
