use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Minimal SigV4 signer for the cloud-KV strategy's JSON-protocol requests.
///
/// Kept self-contained rather than shared with the EC2 transport's signer,
/// since `broker-store` sits below `broker-provider` in the dependency
/// graph (the provider crate depends on storage, not vice versa).
pub struct SigningCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl SigningCredentials {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok()?,
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok()?,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    hex::encode(digest)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Computes the `Authorization` header value for a JSON-protocol POST
/// request (DynamoDB-style: single host header, `x-amz-target`, JSON body).
pub fn authorization_header(
    creds: &SigningCredentials,
    region: &str,
    service: &str,
    host: &str,
    amz_target: &str,
    amz_date: &str,
    body: &[u8],
) -> String {
    let date_stamp = &amz_date[0..8];
    let canonical_headers = format!(
        "content-type:application/x-amz-json-1.0\nhost:{host}\nx-amz-date:{amz_date}\nx-amz-target:{amz_target}\n"
    );
    let signed_headers = "content-type;host;x-amz-date;x-amz-target";
    let payload_hash = sha256_hex(body);
    let canonical_request =
        format!("POST\n/\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}");

    let credential_scope = format!("{date_stamp}/{region}/{service}/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let key = signing_key(&creds.secret_access_key, date_stamp, region, service);
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
        creds.access_key_id
    )
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_key_is_deterministic() {
        let a = signing_key("secret", "20260101", "us-east-1", "dynamodb");
        let b = signing_key("secret", "20260101", "us-east-1", "dynamodb");
        assert_eq!(a, b);
    }

    #[test]
    fn authorization_header_includes_credential_scope() {
        let creds = SigningCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: None,
        };
        let header = authorization_header(
            &creds,
            "us-east-1",
            "dynamodb",
            "dynamodb.us-east-1.amazonaws.com",
            "DynamoDB_20120810.PutItem",
            "20260101T000000Z",
            b"{}",
        );
        assert!(header.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20260101/us-east-1/dynamodb/aws4_request"));
    }
}
