use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use hmac::{Hmac, Mac};
use quick_xml::{events::Event as XmlEvent, Reader as XmlReader};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::ProviderError;

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials resolved once at handler construction and reused for the
/// lifetime of the handler (refreshed transparently when sourced from IMDS).
///
/// Resolution order: static env vars, then ECS/EC2 instance metadata, then
/// the AWS CLI config/credentials files as a last resort.
#[derive(Clone, Debug)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok()?,
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok()?,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }

    pub async fn from_imds(client: &reqwest::Client) -> Result<Self, ProviderError> {
        let token_resp = client
            .put("http://169.254.169.254/latest/api/token")
            .header("X-aws-ec2-metadata-token-ttl-seconds", "21600")
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map_err(|e| ProviderError::Network(format!("IMDSv2 token request: {e}")))?;
        let imds_token = token_resp
            .text()
            .await
            .map_err(|e| ProviderError::Network(format!("IMDSv2 token decode: {e}")))?;

        let roles_resp = client
            .get("http://169.254.169.254/latest/meta-data/iam/security-credentials/")
            .header("X-aws-ec2-metadata-token", &imds_token)
            .send()
            .await
            .map_err(|e| ProviderError::Network(format!("IMDS roles request: {e}")))?;
        let roles_text = roles_resp.text().await.unwrap_or_default();
        let role_name = roles_text.lines().next().unwrap_or("").to_string();
        if role_name.is_empty() {
            return Err(ProviderError::Iam("IMDS: no IAM role found".into()));
        }

        let creds_url = format!(
            "http://169.254.169.254/latest/meta-data/iam/security-credentials/{role_name}"
        );
        let resp: Value = client
            .get(&creds_url)
            .header("X-aws-ec2-metadata-token", &imds_token)
            .send()
            .await
            .map_err(|e| ProviderError::Network(format!("IMDS creds request: {e}")))?
            .json()
            .await
            .map_err(|e| ProviderError::Network(format!("IMDS creds decode: {e}")))?;

        Ok(Self {
            access_key_id: resp["AccessKeyId"].as_str().unwrap_or("").to_string(),
            secret_access_key: resp["SecretAccessKey"].as_str().unwrap_or("").to_string(),
            session_token: resp["Token"].as_str().map(str::to_string),
        })
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn url_host(url: &str) -> &str {
    let without_scheme = url.trim_start_matches("https://").trim_start_matches("http://");
    match without_scheme.find('/') {
        Some(pos) => &without_scheme[..pos],
        None => without_scheme,
    }
}

/// Build SigV4 headers for a Query-API POST request.
fn sigv4_headers(
    body: &[u8],
    creds: &AwsCredentials,
    region: &str,
    service: &str,
    host: &str,
) -> BTreeMap<String, String> {
    let now = chrono::Utc::now();
    let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let content_type = "application/x-www-form-urlencoded; charset=utf-8";
    let payload_hash = sha256_hex(body);

    let mut canon_hdrs: BTreeMap<String, String> = BTreeMap::new();
    canon_hdrs.insert("content-type".into(), content_type.into());
    canon_hdrs.insert("host".into(), host.into());
    canon_hdrs.insert("x-amz-content-sha256".into(), payload_hash.clone());
    canon_hdrs.insert("x-amz-date".into(), timestamp.clone());
    if let Some(token) = &creds.session_token {
        canon_hdrs.insert("x-amz-security-token".into(), token.clone());
    }

    let signed_headers: String = canon_hdrs.keys().cloned().collect::<Vec<_>>().join(";");
    let canonical_headers: String = canon_hdrs
        .iter()
        .map(|(k, v)| format!("{k}:{}\n", v.trim()))
        .collect();

    let canonical_request =
        format!("POST\n/\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}");

    let scope = format!("{date}/{region}/{service}/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{timestamp}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date, region, service);
    let signature = hmac_sha256(&signing_key, string_to_sign.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();

    let auth = format!(
        "AWS4-HMAC-SHA256 Credential={}/{scope},SignedHeaders={signed_headers},Signature={signature}",
        creds.access_key_id
    );

    let mut out = BTreeMap::new();
    out.insert("Authorization".into(), auth);
    out.insert("x-amz-date".into(), timestamp);
    out.insert("x-amz-content-sha256".into(), payload_hash);
    if let Some(token) = &creds.session_token {
        out.insert("x-amz-security-token".into(), token.clone());
    }
    out
}

/// Finds the text content of the first `<tag>…</tag>` element, skipping
/// over nested elements of the same name.
pub fn xml_text(xml: &str, tag: &str) -> Option<String> {
    let tag_bytes = tag.as_bytes();
    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut in_tag = false;
    let mut depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) => {
                if !in_tag && e.local_name().as_ref() == tag_bytes {
                    in_tag = true;
                    depth = 0;
                } else if in_tag {
                    depth += 1;
                }
            }
            Ok(XmlEvent::End(_)) => {
                if in_tag {
                    if depth == 0 {
                        return None;
                    }
                    depth -= 1;
                }
            }
            Ok(XmlEvent::Text(e)) if in_tag && depth == 0 => {
                return e.unescape().ok().map(|s| s.into_owned());
            }
            Ok(XmlEvent::Eof) | Err(_) => break,
            _ => {}
        }
    }
    None
}

/// Collects the text content of every `<tag>…</tag>` element in the document.
pub fn xml_all_texts(xml: &str, tag: &str) -> Vec<String> {
    let tag_bytes = tag.as_bytes();
    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut result = Vec::new();
    let mut depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) => {
                if depth == 0 && e.local_name().as_ref() == tag_bytes {
                    depth = 1;
                } else if depth > 0 {
                    depth += 1;
                }
            }
            Ok(XmlEvent::End(_)) => {
                if depth > 0 {
                    depth -= 1;
                }
            }
            Ok(XmlEvent::Text(e)) if depth == 1 => {
                if let Ok(s) = e.unescape() {
                    result.push(s.into_owned());
                }
            }
            Ok(XmlEvent::Eof) | Err(_) => break,
            _ => {}
        }
    }
    result
}

fn xml_error_code(xml: &str) -> String {
    xml_text(xml, "Code").unwrap_or_else(|| "Unknown".into())
}

fn xml_error_message(xml: &str) -> String {
    xml_text(xml, "Message").unwrap_or_else(|| "unknown error".into())
}

/// One raw AWS error, before retry/classification decides its fate.
pub struct RawAwsError {
    pub code: String,
    pub message: String,
}

/// Thin Query-API transport shared by every EC2/ASG handler. Each handler
/// owns one `EcAwsTransport` and calls `query` with the service-specific
/// base URL and action parameters; signing, error parsing, and the raw
/// error type are handled once here.
pub struct EcAwsTransport {
    client: reqwest::Client,
    region: String,
}

impl EcAwsTransport {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            region: region.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// POST a Query-protocol request, returning the raw XML body on success
    /// or a `RawAwsError` (not yet classified/retried) on an AWS error.
    pub async fn query(
        &self,
        base_url: &str,
        service: &str,
        creds: &AwsCredentials,
        params: &[(&str, &str)],
    ) -> Result<String, RawAwsError> {
        let host = url_host(base_url).to_string();
        let url = format!("{}/", base_url.trim_end_matches('/'));

        let body_str = params
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let body_bytes = body_str.as_bytes();

        let sig_headers = sigv4_headers(body_bytes, creds, &self.region, service, &host);

        let mut req = self
            .client
            .post(&url)
            .header(
                "Content-Type",
                "application/x-www-form-urlencoded; charset=utf-8",
            )
            .body(body_bytes.to_vec());
        for (k, v) in &sig_headers {
            req = req.header(k, v);
        }

        let started = Instant::now();
        let resp = req.send().await.map_err(|e| RawAwsError {
            code: "NetworkError".into(),
            message: e.to_string(),
        })?;
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        debug!(url, status, elapsed_ms = started.elapsed().as_millis() as u64, "EC2 query API call");

        if status >= 400 {
            return Err(RawAwsError {
                code: xml_error_code(&text),
                message: xml_error_message(&text),
            });
        }
        Ok(text)
    }
}
