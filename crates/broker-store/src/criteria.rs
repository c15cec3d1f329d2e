use serde_json::Value;

/// A small query expression language for `StorageStrategy::find_by_criteria`.
///
/// Malformed criteria (an unparsable regex, a field that doesn't exist on a
/// given record) never fail the query — they simply fail to match. Storage
/// strategies must behave identically regardless of backend, so criteria
/// matching is implemented once here against the JSON blob representation
/// and reused by every strategy.
#[derive(Debug, Clone)]
pub enum Criteria {
    Eq { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    Regex { field: String, pattern: String },
    And(Vec<Criteria>),
}

impl Criteria {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Criteria::Eq {
            field: field.into(),
            value,
        }
    }

    pub fn in_set(field: impl Into<String>, values: Vec<Value>) -> Self {
        Criteria::In {
            field: field.into(),
            values,
        }
    }

    pub fn regex(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Criteria::Regex {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    pub fn matches(&self, record: &Value) -> bool {
        match self {
            Criteria::Eq { field, value } => field_value(record, field).as_ref() == Some(value),
            Criteria::In { field, values } => {
                let Some(v) = field_value(record, field) else {
                    return false;
                };
                values.iter().any(|candidate| candidate == &v)
            }
            Criteria::Regex { field, pattern } => {
                let Some(v) = field_value(record, field) else {
                    return false;
                };
                let Some(s) = v.as_str() else {
                    return false;
                };
                match regex::Regex::new(pattern) {
                    Ok(re) => re.is_match(s),
                    Err(_) => false,
                }
            }
            Criteria::And(children) => children.iter().all(|c| c.matches(record)),
        }
    }
}

fn field_value(record: &Value, field: &str) -> Option<Value> {
    record.as_object()?.get(field).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn eq_matches_exact_field_value() {
        let record = json!({"status": "Running"});
        assert!(Criteria::eq("status", json!("Running")).matches(&record));
        assert!(!Criteria::eq("status", json!("Failed")).matches(&record));
    }

    #[test]
    fn in_matches_any_listed_value() {
        let record = json!({"status": "Stopped"});
        let c = Criteria::in_set("status", vec![json!("Running"), json!("Stopped")]);
        assert!(c.matches(&record));
    }

    #[test]
    fn regex_matches_string_field() {
        let record = json!({"request_id": "req-abc123"});
        assert!(Criteria::regex("request_id", "^req-").matches(&record));
        assert!(!Criteria::regex("request_id", "^ret-").matches(&record));
    }

    #[test]
    fn malformed_regex_never_matches_instead_of_erroring() {
        let record = json!({"request_id": "req-abc123"});
        assert!(!Criteria::regex("request_id", "(unterminated").matches(&record));
    }

    #[test]
    fn and_requires_all_children() {
        let record = json!({"status": "Running", "kind": "Acquire"});
        let c = Criteria::And(vec![
            Criteria::eq("status", json!("Running")),
            Criteria::eq("kind", json!("Acquire")),
        ]);
        assert!(c.matches(&record));
        let c2 = Criteria::And(vec![
            Criteria::eq("status", json!("Running")),
            Criteria::eq("kind", json!("Return")),
        ]);
        assert!(!c2.matches(&record));
    }
}
