use crate::config::VenueCredentialsConfig;
use crate::domain::Venue;
use crate::error::{ExecutorError, Result};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the API key on signed requests
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// API key and secret for one venue
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ApiCredentials {
    api_key: String,
    secret: String,
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl ApiCredentials {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
        }
    }

    /// Credentials configured for `venue`; both halves must be present.
    pub fn from_config(venue: Venue, config: &VenueCredentialsConfig) -> Result<Self> {
        let api_key = config.api_key.trim();
        let secret = config.api_secret.trim();
        if api_key.is_empty() || secret.is_empty() {
            return Err(ExecutorError::ExchangeCredentials(format!(
                "missing api key/secret for {}",
                venue
            )));
        }
        Ok(Self::new(api_key, secret))
    }
}

/// HMAC-SHA256 signer for exchange query strings
#[derive(Clone, Debug)]
pub struct HmacAuth {
    credentials: ApiCredentials,
}

impl HmacAuth {
    pub fn new(credentials: ApiCredentials) -> Self {
        Self { credentials }
    }

    /// Lowercase hex HMAC-SHA256 of `query` keyed by the API secret
    pub fn sign(&self, query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.secret.as_bytes())
            .map_err(|e| ExecutorError::Internal(format!("HMAC init failed: {}", e)))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// `query` with the signature appended as the final parameter
    pub fn signed_query(&self, query: &str) -> Result<String> {
        let signature = self.sign(query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    /// Headers for a signed request
    pub fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&self.credentials.api_key).map_err(|_| {
            ExecutorError::ExchangeCredentials("api key is not a valid header value".to_string())
        })?;
        headers.insert(API_KEY_HEADER, value);
        Ok(headers)
    }
}
