use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningSettings};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Request;

const SIGNING_NAME: &str = "bedrock";

/// Signs Bedrock runtime requests with AWS Signature Version 4.
///
/// Credentials are fetched from the provider for every request, so
/// providers that rotate (instance roles, SSO) keep working across a long run.
#[derive(Clone, Debug)]
pub struct SigV4Signer {
    region: String,
    provider: SharedCredentialsProvider,
}

impl SigV4Signer {
    pub fn new(region: impl Into<String>, provider: SharedCredentialsProvider) -> Self {
        Self {
            region: region.into(),
            provider,
        }
    }

    /// Static access key pair, as written in the config file.
    pub fn from_keys(
        region: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        let credentials = Credentials::new(
            access_key_id,
            secret_access_key,
            session_token,
            None,
            "bedrockbench-config",
        );
        Self::new(region, SharedCredentialsProvider::new(credentials))
    }

    /// Environment, shared profile files, web identity, container and instance roles.
    pub async fn from_default_chain(region: impl Into<String>) -> Result<Self> {
        let region = region.into();
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .load()
            .await;
        let provider = sdk_config
            .credentials_provider()
            .ok_or_else(|| anyhow!("no AWS credentials provider available for {}", region))?;
        // a chain with no usable credentials is a startup error
        provider
            .provide_credentials()
            .await
            .context("failed to resolve AWS credentials from the default chain")?;
        Ok(Self::new(region, provider))
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Adds `authorization`, `x-amz-date` and, for temporary credentials,
    /// `x-amz-security-token` to a fully built request.
    pub async fn sign(&self, request: &mut Request) -> Result<()> {
        let credentials = self
            .provider
            .provide_credentials()
            .await
            .context("failed to resolve AWS credentials")?;
        let identity = Identity::from(credentials);

        let settings = SigningSettings::default();
        let params = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name(SIGNING_NAME)
            .time(SystemTime::now())
            .settings(settings)
            .build()
            .context("invalid SigV4 signing parameters")?
            .into();

        let instructions = {
            let headers = request
                .headers()
                .iter()
                .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str(), value)));
            let body = request
                .body()
                .and_then(|body| body.as_bytes())
                .unwrap_or_default();
            let signable = SignableRequest::new(
                request.method().as_str(),
                request.url().as_str(),
                headers,
                SignableBody::Bytes(body),
            )
            .context("request cannot be signed")?;
            let (instructions, _signature) = sign(signable, &params)
                .context("failed to sign request")?
                .into_parts();
            instructions
        };

        for (name, value) in instructions.headers() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid signed header name {}", name))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for signed header {}", name))?;
            request.headers_mut().insert(name, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request {
        let client = reqwest::Client::new();
        client
            .post("https://bedrock-runtime.us-east-1.amazonaws.com/model/anthropic.claude-3-haiku/invoke")
            .header("content-type", "application/json")
            .body(r#"{"max_tokens":8}"#)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn static_keys_produce_sigv4_headers() {
        let signer = SigV4Signer::from_keys("us-east-1", "AKIDEXAMPLE", "secret", None);
        let mut request = request();
        signer.sign(&mut request).await.unwrap();

        let auth = request.headers()["authorization"].to_str().unwrap();
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
        assert!(auth.contains("/us-east-1/bedrock/aws4_request"));
        assert!(auth.contains("SignedHeaders="));
        assert!(request.headers().contains_key("x-amz-date"));
        assert!(!request.headers().contains_key("x-amz-security-token"));
    }

    #[tokio::test]
    async fn session_token_is_forwarded() {
        let signer = SigV4Signer::from_keys("eu-west-1", "ASIAEXAMPLE", "secret", Some("token".into()));
        let mut request = request();
        signer.sign(&mut request).await.unwrap();

        assert_eq!(request.headers()["x-amz-security-token"], "token");
        assert_eq!(signer.region(), "eu-west-1");
    }
}
