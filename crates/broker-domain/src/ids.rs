use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use uuid::Uuid;

use crate::error::DomainError;
use crate::request::RequestType;

fn template_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap())
}

fn req_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^req-[0-9a-f-]{36}$").unwrap())
}

fn ret_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^ret-[0-9a-f-]{36}$").unwrap())
}

fn machine_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[ij]-[a-f0-9]+$").unwrap())
}

/// Provisioning-recipe identifier. Alphanumeric, hyphen, underscore.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(String);

impl TemplateId {
    pub fn new(s: impl Into<String>) -> Result<Self, DomainError> {
        let s = s.into();
        if !template_id_re().is_match(&s) {
            return Err(DomainError::InvalidTemplateId(s));
        }
        Ok(TemplateId(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request identifier. The `req-`/`ret-` prefix is semantic: it determines
/// [`RequestType`] and is not just decorative.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(s: impl Into<String>) -> Result<Self, DomainError> {
        let s = s.into();
        if !req_id_re().is_match(&s) && !ret_id_re().is_match(&s) {
            return Err(DomainError::InvalidRequestId(s));
        }
        Ok(RequestId(s))
    }

    pub fn generate(request_type: RequestType) -> Self {
        let prefix = match request_type {
            RequestType::Acquire => "req",
            RequestType::Return => "ret",
        };
        RequestId(format!("{prefix}-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn request_type(&self) -> RequestType {
        if self.0.starts_with("req-") {
            RequestType::Acquire
        } else {
            RequestType::Return
        }
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provider-native instance identifier, e.g. `i-0123abcd` or a reservation-scoped
/// `j-` id used by some direct-launch accounting paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MachineId(String);

impl MachineId {
    pub fn new(s: impl Into<String>) -> Result<Self, DomainError> {
        let s = s.into();
        if !machine_id_re().is_match(&s) {
            return Err(DomainError::InvalidMachineId(s));
        }
        Ok(MachineId(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MachineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_id_rejects_punctuation() {
        assert!(TemplateId::new("ok-one_2").is_ok());
        assert!(TemplateId::new("not ok").is_err());
        assert!(TemplateId::new("not/ok").is_err());
    }

    #[test]
    fn request_id_generate_matches_prefix_regex() {
        let acquire = RequestId::generate(RequestType::Acquire);
        assert!(acquire.as_str().starts_with("req-"));
        assert_eq!(acquire.request_type(), RequestType::Acquire);

        let ret = RequestId::generate(RequestType::Return);
        assert!(ret.as_str().starts_with("ret-"));
        assert_eq!(ret.request_type(), RequestType::Return);
    }

    #[test]
    fn request_id_rejects_bad_prefix() {
        assert!(RequestId::new("foo-123").is_err());
    }

    #[test]
    fn machine_id_accepts_i_and_j_prefix() {
        assert!(MachineId::new("i-0abc123").is_ok());
        assert!(MachineId::new("j-0abc123").is_ok());
        assert!(MachineId::new("x-0abc123").is_err());
        assert!(MachineId::new("i-UPPER").is_err());
    }
}
