//! Server-side authentication for the provider's REST APIs.
//!
//! Every request carries the API key as a query parameter and a server token:
//! an HS256 JWT signed with the API secret whose only claim is `server: true`.

use anyhow::{Context, Result};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerClaims {
    pub server: bool,
}

#[derive(Clone)]
pub struct ServerAuth {
    api_key: String,
    encoding_key: EncodingKey,
}

impl ServerAuth {
    pub fn new(api_key: impl Into<String>, api_secret: impl AsRef<str>) -> Self {
        Self {
            api_key: api_key.into(),
            encoding_key: EncodingKey::from_secret(api_secret.as_ref().as_bytes()),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn server_token(&self) -> Result<String> {
        encode(
            &Header::new(Algorithm::HS256),
            &ServerClaims { server: true },
            &self.encoding_key,
        )
        .context("Failed to sign server token")
    }

    /// Attach the API key and server token to an outbound request.
    pub fn authorize(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        let token = self.server_token()?;
        Ok(request
            .query(&[("api_key", self.api_key.as_str())])
            .header("Authorization", token)
            .header("stream-auth-type", "jwt"))
    }
}
