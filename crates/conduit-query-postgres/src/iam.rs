//! RDS IAM authentication tokens.
//!
//! A token is the `connect` URL of the database endpoint, presigned with
//! SigV4 query parameters for the `rds-db` service, minus the scheme.

use aws_config::Region;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::Credentials;
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SignatureLocation, SigningSettings};
use aws_sigv4::sign::v4;
use conduit_query::{DataError, Result};
use std::time::{Duration, SystemTime};
use tracing::debug;

const SIGNING_NAME: &str = "rds-db";

/// Percent-encode everything outside the RFC 3986 unreserved set
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

/// Endpoint and identity a token is issued for
#[derive(Debug, Clone)]
pub(crate) struct TokenRequest<'a> {
    pub host: &'a str,
    pub port: u16,
    pub user: &'a str,
    pub region: &'a str,
    pub expires_in: Duration,
}

impl TokenRequest<'_> {
    /// Presign with the given credentials at `time`
    pub fn presign(&self, credentials: Credentials, time: SystemTime) -> Result<String> {
        let identity = credentials.into();

        let mut settings = SigningSettings::default();
        settings.expires_in = Some(self.expires_in);
        settings.signature_location = SignatureLocation::QueryParams;

        let params = v4::SigningParams::builder()
            .identity(&identity)
            .region(self.region)
            .name(SIGNING_NAME)
            .time(time)
            .settings(settings)
            .build()
            .map_err(|e| DataError::configuration(format!("Invalid IAM signing settings: {}", e)))?
            .into();

        let url = format!(
            "https://{}:{}/?Action=connect&DBUser={}",
            self.host,
            self.port,
            encode_component(self.user)
        );
        let request = SignableRequest::new("GET", url.as_str(), std::iter::empty(), SignableBody::empty())
            .map_err(|e| DataError::configuration(format!("Invalid IAM token endpoint: {}", e)))?;
        let (instructions, _signature) = sign(request, &params)
            .map_err(|e| DataError::ConnectionFailed(format!("IAM token signing failed: {}", e)))?
            .into_parts();

        let mut token = url
            .strip_prefix("https://")
            .unwrap_or(url.as_str())
            .to_string();
        for (name, value) in instructions.params() {
            token.push('&');
            token.push_str(name);
            token.push('=');
            token.push_str(&encode_component(value));
        }
        Ok(token)
    }

    /// Resolve credentials from the default AWS chain and presign now
    pub async fn generate(&self) -> Result<String> {
        debug!(
            "Generating RDS IAM token for {}@{}:{} in {}",
            self.user, self.host, self.port, self.region
        );

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(self.region.to_string()))
            .load()
            .await;
        let provider = sdk_config.credentials_provider().ok_or_else(|| {
            DataError::ConnectionFailed("No AWS credentials available for IAM auth".into())
        })?;
        let credentials = provider.provide_credentials().await.map_err(|e| {
            DataError::ConnectionFailed(format!("Failed to load AWS credentials: {}", e))
        })?;

        self.presign(credentials, SystemTime::now())
    }
}
