//! Declarative field-level validation.
//!
//! A [`RuleSet`] binds named fields to lists of [`Rule`]s. It starts from the
//! entity's own base rules restricted by an allow-list ([`RuleSet::only`]) or
//! a deny-list ([`RuleSet::exclude`]), with further rules appended explicitly.
//! A [`Validator`] checks a submitted JSON object against a target instance
//! and reports every failing field at once; only a successful validation
//! yields a [`Validated`] value, which is the sole path to persistence.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use sea_orm::{DatabaseConnection, DbErr};
use serde_json::{Map, Value};

use crate::config::SecurityConfig;
use crate::resource::Record;

/// A submitted request body, as a JSON object.
pub type Submitted = Map<String, Value>;

/// Field name -> human-readable error message.
pub type ErrorMap = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// One or more fields failed validation; the map is the response payload.
    #[error("validation failed")]
    Invalid(ErrorMap),

    #[error(transparent)]
    Db(#[from] DbErr),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Build a single-entry error map.
#[must_use]
pub fn field_error(field: &str, message: &str) -> ErrorMap {
    let mut errors = ErrorMap::new();
    errors.insert(field.to_string(), message.to_string());
    errors
}

type Predicate<M> = Box<dyn Fn(&M, &str) -> bool + Send + Sync>;

pub enum Rule<M> {
    /// The field must have a non-empty value, either submitted or already
    /// present on the target instance.
    Required,
    /// Minimum length in characters of a submitted value.
    MinLength(usize),
    /// Maximum length in characters of a submitted value.
    MaxLength(usize),
    /// A submitted value must look like an email address.
    Email,
    /// No other stored instance may share the submitted value for this field.
    Unique,
    /// Arbitrary predicate over the target instance's pre-update state and
    /// the submitted value. Skipped when the target has never been persisted,
    /// since a fresh draft has no prior state to check against.
    Check {
        test: Predicate<M>,
        message: &'static str,
    },
}

impl<M> Rule<M> {
    pub fn check(
        test: impl Fn(&M, &str) -> bool + Send + Sync + 'static,
        message: &'static str,
    ) -> Self {
        Self::Check {
            test: Box::new(test),
            message,
        }
    }
}

pub struct RuleSet<M> {
    fields: Vec<(&'static str, Vec<Rule<M>>)>,
}

impl<M: Record> RuleSet<M> {
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Declare a field with its rules. Used by entities to build their base
    /// rule set.
    #[must_use]
    pub fn field(mut self, name: &'static str, rules: Vec<Rule<M>>) -> Self {
        self.fields.push((name, rules));
        self
    }

    /// Restrict the entity's base rules to an explicit allow-list. Names
    /// without a base entry (e.g. virtual fields like `password`) start with
    /// no rules and are configured via [`RuleSet::rule`].
    #[must_use]
    pub fn only(names: &[&'static str]) -> Self {
        let mut base: Vec<Option<(&'static str, Vec<Rule<M>>)>> =
            M::base_rules().fields.into_iter().map(Some).collect();

        let mut fields = Vec::with_capacity(names.len());
        for &name in names {
            let slot = base
                .iter_mut()
                .find(|slot| slot.as_ref().is_some_and(|(n, _)| *n == name));
            match slot {
                Some(slot) => fields.push(slot.take().expect("slot checked above")),
                None => fields.push((name, Vec::new())),
            }
        }

        Self { fields }
    }

    /// The entity's base rules minus an explicit deny-list.
    #[must_use]
    pub fn exclude(names: &[&'static str]) -> Self {
        let fields = M::base_rules()
            .fields
            .into_iter()
            .filter(|(name, _)| !names.contains(name))
            .collect();
        Self { fields }
    }

    /// Append a rule to a field, adding the field if it is not governed yet.
    #[must_use]
    pub fn rule(mut self, name: &'static str, rule: Rule<M>) -> Self {
        if let Some((_, rules)) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            rules.push(rule);
        } else {
            self.fields.push((name, vec![rule]));
        }
        self
    }
}

/// Checks submitted fields against a target instance.
pub struct Validator<'a, M: Record> {
    target: &'a M,
    rules: RuleSet<M>,
}

impl<'a, M: Record> Validator<'a, M> {
    pub fn new(target: &'a M, rules: RuleSet<M>) -> Self {
        Self { target, rules }
    }

    /// Check every governed field. All failing fields are reported together;
    /// per field, the first failing rule wins.
    pub async fn validate(
        self,
        conn: &DatabaseConnection,
        submitted: &Submitted,
    ) -> Result<Validated<M>, Error> {
        self.run(conn, submitted, None).await
    }

    /// Check only the named subset of governed fields.
    pub async fn validate_only(
        self,
        conn: &DatabaseConnection,
        submitted: &Submitted,
        only: &[&str],
    ) -> Result<Validated<M>, Error> {
        self.run(conn, submitted, Some(only)).await
    }

    async fn run(
        self,
        conn: &DatabaseConnection,
        submitted: &Submitted,
        restrict: Option<&[&str]>,
    ) -> Result<Validated<M>, Error> {
        let mut errors = ErrorMap::new();
        let mut accepted = Submitted::new();

        for (name, rules) in &self.rules.fields {
            if restrict.is_some_and(|only| !only.iter().any(|f| *f == *name)) {
                continue;
            }

            let given = submitted.get(*name);
            let given_present = given.is_some_and(present);
            let given_text = given.and_then(|value| text(value));

            // Required-ness may be satisfied by the value the target already
            // holds, so partial updates do not have to resubmit every field.
            let effective_present =
                given_present || self.target.field(name).as_ref().is_some_and(present);

            let mut failure: Option<String> = None;
            for rule in rules {
                failure = match rule {
                    Rule::Required => {
                        (!effective_present).then(|| "This field is required.".to_string())
                    }
                    Rule::MinLength(min) => given_text
                        .filter(|value| value.chars().count() < *min)
                        .map(|_| format!("Must be at least {min} characters.")),
                    Rule::MaxLength(max) => given_text
                        .filter(|value| value.chars().count() > *max)
                        .map(|_| format!("Must be at most {max} characters.")),
                    Rule::Email => given_text
                        .filter(|value| !email_regex().is_match(value))
                        .map(|_| "Must be a valid email address.".to_string()),
                    Rule::Unique => match given_text {
                        Some(value) => M::value_taken(
                            conn,
                            name,
                            value,
                            self.target.primary_key(),
                        )
                        .await?
                        .then(|| "Must be a unique value.".to_string()),
                        None => None,
                    },
                    Rule::Check { test, message } => match (self.target.primary_key(), given_text)
                    {
                        (Some(_), Some(value)) => {
                            (!test(self.target, value)).then(|| (*message).to_string())
                        }
                        _ => None,
                    },
                };

                if failure.is_some() {
                    break;
                }
            }

            if let Some(message) = failure {
                errors.insert((*name).to_string(), message);
            } else if given_present
                && let Some(value) = given
            {
                accepted.insert((*name).to_string(), value.clone());
            }
        }

        if errors.is_empty() {
            Ok(Validated {
                target: self.target.clone(),
                accepted,
            })
        } else {
            Err(Error::Invalid(errors))
        }
    }
}

/// The outcome of a successful validation. Holds the accepted submitted
/// values; persisting without validating first is unrepresentable.
pub struct Validated<M: Record> {
    target: M,
    accepted: Submitted,
}

impl<M: Record> Validated<M> {
    /// Apply the accepted values onto the target and persist it. A storage
    /// uniqueness violation (a concurrent create that won the race) comes
    /// back as [`Error::Invalid`] with the same shape as a pre-checked one.
    pub async fn save(
        mut self,
        conn: &DatabaseConnection,
        security: &SecurityConfig,
    ) -> Result<M, Error> {
        for (name, value) in &self.accepted {
            self.target.apply(name, value, security).await?;
        }
        self.target.persist(conn).await
    }
}

/// Whether a submitted value counts as given: empty strings and nulls do not.
fn present(value: &Value) -> bool {
    match value {
        Value::String(text) => !text.is_empty(),
        Value::Null => false,
        _ => true,
    }
}

fn text(value: &Value) -> Option<&str> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text),
        _ => None,
    }
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("Invalid regex"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::entities::users;
    use serde_json::json;

    fn registration_rules() -> RuleSet<users::Model> {
        RuleSet::only(&["email", "username", "password"])
            .rule("email", Rule::Email)
            .rule("password", Rule::Required)
            .rule("password", Rule::MinLength(6))
    }

    fn submitted(value: Value) -> Submitted {
        value.as_object().cloned().unwrap()
    }

    async fn create_user(store: &Store, username: &str, email: &str, password: &str) -> users::Model {
        let draft = users::Model::draft();
        Validator::new(&draft, registration_rules())
            .validate(
                &store.conn,
                &submitted(json!({
                    "username": username,
                    "email": email,
                    "password": password,
                })),
            )
            .await
            .unwrap()
            .save(&store.conn, &SecurityConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn empty_submission_reports_every_field() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let draft = users::Model::draft();

        let err = Validator::new(&draft, registration_rules())
            .validate(&store.conn, &Submitted::new())
            .await
            .err()
            .unwrap();

        let Error::Invalid(errors) = err else {
            panic!("expected Invalid");
        };
        assert!(errors.contains_key("email"));
        assert!(errors.contains_key("username"));
        assert!(errors.contains_key("password"));
    }

    #[tokio::test]
    async fn bad_email_is_the_only_error() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let draft = users::Model::draft();

        let err = Validator::new(&draft, registration_rules())
            .validate(
                &store.conn,
                &submitted(json!({
                    "username": "someuser",
                    "email": "invalid-email",
                    "password": "welcome",
                })),
            )
            .await
            .err()
            .unwrap();

        let Error::Invalid(errors) = err else {
            panic!("expected Invalid");
        };
        assert!(errors.contains_key("email"));
        assert!(!errors.contains_key("username"));
        assert!(!errors.contains_key("password"));
    }

    #[tokio::test]
    async fn short_password_is_rejected() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let draft = users::Model::draft();

        let err = Validator::new(&draft, registration_rules())
            .validate(
                &store.conn,
                &submitted(json!({
                    "username": "someuser",
                    "email": "someuser@example.com",
                    "password": "tiny",
                })),
            )
            .await
            .err()
            .unwrap();

        let Error::Invalid(errors) = err else {
            panic!("expected Invalid");
        };
        assert_eq!(errors.get("password").unwrap(), "Must be at least 6 characters.");
    }

    #[tokio::test]
    async fn duplicate_value_fails_the_precheck() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        create_user(&store, "taken", "taken@example.com", "welcome").await;

        let draft = users::Model::draft();
        let err = Validator::new(&draft, registration_rules())
            .validate(
                &store.conn,
                &submitted(json!({
                    "username": "taken",
                    "email": "other@example.com",
                    "password": "welcome",
                })),
            )
            .await
            .err()
            .unwrap();

        let Error::Invalid(errors) = err else {
            panic!("expected Invalid");
        };
        assert_eq!(errors.get("username").unwrap(), "Must be a unique value.");
    }

    #[tokio::test]
    async fn persisted_values_satisfy_required_on_update() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let user = create_user(&store, "tim", "tim@example.com", "welcome").await;

        // Only the email is resubmitted; username falls back to the stored
        // value, and its uniqueness check must not trip over the row itself.
        let updated = Validator::new(&user, RuleSet::exclude(&["password_hash"]))
            .validate(&store.conn, &submitted(json!({"email": "new@example.com"})))
            .await
            .unwrap()
            .save(&store.conn, &SecurityConfig::default())
            .await
            .unwrap();

        assert_eq!(updated.email, "new@example.com");
        assert_eq!(updated.username, "tim");
    }

    #[tokio::test]
    async fn restriction_skips_other_fields() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let user = create_user(&store, "tim", "tim@example.com", "welcome").await;

        let rules = RuleSet::only(&["email", "current_password"])
            .rule("current_password", Rule::Required)
            .rule(
                "current_password",
                Rule::check(users::Model::check_password, "Current password is incorrect."),
            );

        // Restricted to current_password: a missing email is not an error.
        let result = Validator::new(&user, rules)
            .validate_only(
                &store.conn,
                &submitted(json!({"current_password": "welcome"})),
                &["current_password"],
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn check_rule_inspects_the_pre_update_state() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let user = create_user(&store, "tim", "tim@example.com", "welcome").await;

        let rules = || {
            RuleSet::only(&["current_password"])
                .rule("current_password", Rule::Required)
                .rule(
                    "current_password",
                    Rule::check(users::Model::check_password, "Current password is incorrect."),
                )
        };

        let err = Validator::new(&user, rules())
            .validate(&store.conn, &submitted(json!({"current_password": "bad"})))
            .await
            .err()
            .unwrap();
        let Error::Invalid(errors) = err else {
            panic!("expected Invalid");
        };
        assert_eq!(
            errors.get("current_password").unwrap(),
            "Current password is incorrect."
        );

        // A draft has no stored secret to confirm against; the rule is
        // skipped and only required-ness applies.
        let draft = users::Model::draft();
        let result = Validator::new(&draft, rules())
            .validate(&store.conn, &submitted(json!({"current_password": "anything"})))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn empty_password_leaves_the_hash_unchanged() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let user = create_user(&store, "tim", "tim@example.com", "welcome").await;
        let original_hash = user.password_hash.clone();

        let rules = || {
            RuleSet::exclude(&["password_hash"]).rule("password", Rule::MinLength(6))
        };

        let updated = Validator::new(&user, rules())
            .validate(&store.conn, &submitted(json!({"password": ""})))
            .await
            .unwrap()
            .save(&store.conn, &SecurityConfig::default())
            .await
            .unwrap();

        assert_eq!(updated.password_hash, original_hash);
        assert!(updated.check_password("welcome"));

        // A real submission does rotate the hash.
        let updated = Validator::new(&updated, rules())
            .validate(&store.conn, &submitted(json!({"password": "newpassword"})))
            .await
            .unwrap()
            .save(&store.conn, &SecurityConfig::default())
            .await
            .unwrap();

        assert_ne!(updated.password_hash, original_hash);
        assert!(updated.check_password("newpassword"));
        assert!(!updated.check_password("welcome"));
    }

    #[tokio::test]
    async fn storage_race_surfaces_as_a_field_error() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        create_user(&store, "first", "first@example.com", "welcome").await;

        // Bypass the pre-check by persisting a colliding draft directly,
        // as a concurrent request that won the race would have.
        let mut draft = users::Model::draft();
        draft.username = "first".to_string();
        draft.email = "second@example.com".to_string();
        let err = draft.persist(&store.conn).await.err().unwrap();

        let Error::Invalid(errors) = err else {
            panic!("expected Invalid");
        };
        assert_eq!(errors.get("username").unwrap(), "Must be a unique value.");
    }
}
