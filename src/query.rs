//! Declarative query validation.
//!
//! Backends that care about query shape attach a [`QueryValidator`] to a
//! registration; the validator runs against that backend's own clone of the
//! query, checking required keys, kind constraints, and filling defaults
//! before the handler sees it.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::types::Query;

/// JSON value kinds a query key may be constrained to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Null,
    Bool,
    Integer,
    Float,
    String,
    Array,
    Object,
}

impl Kind {
    /// Classify a JSON value.
    pub fn of(value: &Value) -> Kind {
        match value {
            Value::Null => Kind::Null,
            Value::Bool(_) => Kind::Bool,
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    Kind::Integer
                } else {
                    Kind::Float
                }
            }
            Value::String(_) => Kind::String,
            Value::Array(_) => Kind::Array,
            Value::Object(_) => Kind::Object,
        }
    }

    /// Whether a value of kind `got` satisfies this expected kind.
    ///
    /// `Float` accepts integral numbers; everything else is exact.
    fn accepts(self, got: Kind) -> bool {
        self == got || (self == Kind::Float && got == Kind::Integer)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Null => "null",
            Kind::Bool => "bool",
            Kind::Integer => "integer",
            Kind::Float => "float",
            Kind::String => "string",
            Kind::Array => "array",
            Kind::Object => "object",
        };
        f.write_str(name)
    }
}

/// Query shape violations.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValidationError {
    MissingKey {
        key: String,
    },
    WrongKind {
        key: String,
        expected: Vec<Kind>,
        got: Kind,
    },
}

impl fmt::Display for QueryValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryValidationError::MissingKey { key } => {
                write!(f, "query is missing required key \"{}\"", key)
            }
            QueryValidationError::WrongKind { key, expected, got } => {
                let expected: Vec<String> = expected.iter().map(|k| k.to_string()).collect();
                write!(
                    f,
                    "query key \"{}\" must be one of [{}], got {}",
                    key,
                    expected.join(", "),
                    got
                )
            }
        }
    }
}

impl std::error::Error for QueryValidationError {}

type ComputedDefault = Arc<dyn Fn(&Query) -> Value + Send + Sync>;

enum Rule {
    Require {
        key: String,
        kinds: Vec<Kind>,
    },
    /// At least one of the branches must be present and well-kinded.
    Either {
        branches: Vec<(String, Vec<Kind>)>,
    },
    Allow {
        key: String,
        kinds: Vec<Kind>,
    },
    Default {
        key: String,
        value: Value,
    },
    DefaultWith {
        key: String,
        compute: ComputedDefault,
    },
}

/// Declarative validator for [`Query`] shapes.
///
/// Rules are evaluated in registration order, so a computed default can see
/// defaults filled by earlier rules. An empty kind list means "any kind".
#[derive(Default)]
pub struct QueryValidator {
    rules: Vec<Rule>,
}

impl QueryValidator {
    pub fn new() -> Self {
        // The builder method `default` shadows `Default::default` here.
        QueryValidator { rules: Vec::new() }
    }

    /// Key must be present, with one of `kinds` (empty slice = any kind).
    pub fn require(mut self, key: impl Into<String>, kinds: &[Kind]) -> Self {
        self.rules.push(Rule::Require {
            key: key.into(),
            kinds: kinds.to_vec(),
        });
        self
    }

    /// At least one of the branch keys must be present.
    ///
    /// A branch that is present but wrongly kinded fails eagerly even if a
    /// sibling branch would satisfy the group; when every branch is absent
    /// the error names the first branch.
    pub fn either(mut self, branches: &[(&str, &[Kind])]) -> Self {
        self.rules.push(Rule::Either {
            branches: branches
                .iter()
                .map(|(key, kinds)| ((*key).to_string(), kinds.to_vec()))
                .collect(),
        });
        self
    }

    /// Key is optional; kind-checked only when present.
    pub fn allow(mut self, key: impl Into<String>, kinds: &[Kind]) -> Self {
        self.rules.push(Rule::Allow {
            key: key.into(),
            kinds: kinds.to_vec(),
        });
        self
    }

    /// Insert `value` when the key is absent.
    pub fn default(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.rules.push(Rule::Default {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Insert a computed value when the key is absent. The closure sees the
    /// query as validated so far.
    pub fn default_with<F>(mut self, key: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Query) -> Value + Send + Sync + 'static,
    {
        self.rules.push(Rule::DefaultWith {
            key: key.into(),
            compute: Arc::new(compute),
        });
        self
    }

    /// Check `query` against every rule, filling defaults in place.
    pub fn validate(&self, query: &mut Query) -> Result<(), QueryValidationError> {
        for rule in &self.rules {
            match rule {
                Rule::Require { key, kinds } => {
                    let value = query
                        .get(key)
                        .ok_or_else(|| QueryValidationError::MissingKey { key: key.clone() })?;
                    check_kinds(key, kinds, value)?;
                }
                Rule::Either { branches } => {
                    let mut satisfied = false;
                    for (key, kinds) in branches {
                        if let Some(value) = query.get(key) {
                            check_kinds(key, kinds, value)?;
                            satisfied = true;
                        }
                    }
                    if !satisfied {
                        let key = branches
                            .first()
                            .map(|(key, _)| key.clone())
                            .unwrap_or_default();
                        return Err(QueryValidationError::MissingKey { key });
                    }
                }
                Rule::Allow { key, kinds } => {
                    if let Some(value) = query.get(key) {
                        check_kinds(key, kinds, value)?;
                    }
                }
                Rule::Default { key, value } => {
                    if !query.contains(key) {
                        query.insert(key.clone(), value.clone());
                    }
                }
                Rule::DefaultWith { key, compute } => {
                    if !query.contains(key) {
                        let value = compute(query);
                        query.insert(key.clone(), value);
                    }
                }
            }
        }
        Ok(())
    }
}

fn check_kinds(key: &str, kinds: &[Kind], value: &Value) -> Result<(), QueryValidationError> {
    if kinds.is_empty() {
        return Ok(());
    }
    let got = Kind::of(value);
    if kinds.iter().any(|kind| kind.accepts(got)) {
        return Ok(());
    }
    Err(QueryValidationError::WrongKind {
        key: key.to_string(),
        expected: kinds.to_vec(),
        got,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fresh_validator_has_no_rules() {
        // `new` must build an empty validator even though the builder has
        // its own inherent `default` method.
        let validator = QueryValidator::new();
        let mut query = Query::new();
        validator.validate(&mut query).unwrap();
        assert!(query.is_empty());

        let via_trait: QueryValidator = Default::default();
        via_trait.validate(&mut Query::new()).unwrap();
    }

    #[test]
    fn test_require_present_and_kinded() {
        let validator = QueryValidator::new().require("filename", &[Kind::String]);

        let mut ok = Query::new().with("filename", "find_me");
        assert!(validator.validate(&mut ok).is_ok());

        let mut missing = Query::new();
        assert_eq!(
            validator.validate(&mut missing),
            Err(QueryValidationError::MissingKey {
                key: "filename".to_string()
            })
        );

        let mut wrong = Query::new().with("filename", 42);
        assert!(matches!(
            validator.validate(&mut wrong),
            Err(QueryValidationError::WrongKind { .. })
        ));
    }

    #[test]
    fn test_float_accepts_integer() {
        let validator = QueryValidator::new().require("score", &[Kind::Float]);
        let mut query = Query::new().with("score", 3);
        assert!(validator.validate(&mut query).is_ok());
    }

    #[test]
    fn test_either_group() {
        let validator =
            QueryValidator::new().either(&[("id", &[Kind::Integer]), ("name", &[Kind::String])]);

        let mut by_name = Query::new().with("name", "doc");
        assert!(validator.validate(&mut by_name).is_ok());

        // Wrong kind on a present branch fails even though the sibling is fine.
        let mut bad_id = Query::new().with("id", "not-a-number").with("name", "doc");
        assert!(matches!(
            validator.validate(&mut bad_id),
            Err(QueryValidationError::WrongKind { .. })
        ));

        // All absent names the first branch.
        let mut empty = Query::new();
        assert_eq!(
            validator.validate(&mut empty),
            Err(QueryValidationError::MissingKey {
                key: "id".to_string()
            })
        );
    }

    #[test]
    fn test_defaults_fill_absent_keys_only() {
        let validator = QueryValidator::new()
            .default("region", "NA")
            .default_with("limit", |query| {
                // Half of "count" when present, otherwise 10.
                match query.get("count").and_then(Value::as_i64) {
                    Some(count) => json!(count / 2),
                    None => json!(10),
                }
            });

        let mut query = Query::new().with("count", 50).with("region", "EU");
        validator.validate(&mut query).unwrap();
        assert_eq!(query.get("region"), Some(&json!("EU")));
        assert_eq!(query.get("limit"), Some(&json!(25)));
    }

    #[test]
    fn test_allow_checks_only_when_present() {
        let validator = QueryValidator::new().allow("count", &[Kind::Integer]);

        let mut absent = Query::new();
        assert!(validator.validate(&mut absent).is_ok());

        let mut wrong = Query::new().with("count", "many");
        assert!(validator.validate(&mut wrong).is_err());
    }
}
