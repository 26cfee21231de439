//! User document validation.
//!
//! Bodies are JSON objects:
//!
//! ```json
//! {
//!   "username": "billy2000",
//!   "fullname": "Billy Bobson",
//!   "email": "billy@bobmail.com",
//!   "address": {"name": "Billy", "line 1": "44 Bobstreet", "region": "Bobville", "country": "Bobland"}
//! }
//! ```
//!
//! Usernames are case-insensitive and always come back lower-cased.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const USERNAME_MIN: usize = 8;
const USERNAME_MAX: usize = 64;
const FULLNAME_MIN: usize = 3;
const FULLNAME_MAX: usize = 128;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("{0} is a required field")]
    MissingField(&'static str),

    #[error("Address {0} is a required field")]
    MissingAddressField(&'static str),

    #[error("Username is less than 8 characters")]
    UsernameTooShort,

    #[error("Username is greater than 64 characters")]
    UsernameTooLong,

    #[error("Username does not begin with a roman alphabetic character")]
    UsernameBadStart,

    #[error("Username is not alphanumeric")]
    UsernameNotAlphanumeric,

    #[error("Fullname is less than 3 characters")]
    FullnameTooShort,

    #[error("Fullname is greater than 128 characters")]
    FullnameTooLong,

    #[error("Email address is not valid")]
    InvalidEmail,

    #[error("Username cannot be changed")]
    UsernameChanged,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Address {
    pub name: String,
    #[serde(rename = "line 1", alias = "Line 1")]
    pub line1: String,
    #[serde(rename = "line 2", alias = "Line 2", skip_serializing_if = "String::is_empty")]
    pub line2: String,
    #[serde(rename = "line 3", alias = "Line 3", skip_serializing_if = "String::is_empty")]
    pub line3: String,
    pub region: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub postcode: String,
    pub country: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub username: String,
    pub fullname: String,
    pub email: String,
    pub address: Address,
}

impl User {
    pub fn to_json(&self) -> String {
        // Plain strings only; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Parses and validates a new user document, lower-casing the username.
pub fn parse_user(json: &str) -> Result<User, ValidationError> {
    let mut user: User = serde_json::from_str(json)?;

    if user.username.is_empty() {
        return Err(ValidationError::MissingField("Username"));
    }
    if user.fullname.is_empty() {
        return Err(ValidationError::MissingField("Fullname"));
    }
    if user.email.is_empty() {
        return Err(ValidationError::MissingField("Email"));
    }

    validate_username(&user.username)?;
    validate_fullname(&user.fullname)?;
    validate_email(&user.email)?;
    validate_address(&user.address)?;

    user.username.make_ascii_lowercase();
    Ok(user)
}

/// Validates a new user document and returns its lower-cased username.
pub fn validate_user(json: &str) -> Result<String, ValidationError> {
    parse_user(json).map(|user| user.username)
}

/// Validates a replacement document for `username`.
///
/// The body must be a complete, valid user whose username matches the one
/// being edited (case-insensitively).
pub fn validate_edit(username: &str, json: &str) -> Result<User, ValidationError> {
    let user = parse_user(json)?;
    if !user.username.eq_ignore_ascii_case(username) {
        return Err(ValidationError::UsernameChanged);
    }
    Ok(user)
}

fn validate_username(input: &str) -> Result<(), ValidationError> {
    if input.len() < USERNAME_MIN {
        return Err(ValidationError::UsernameTooShort);
    }
    if input.len() > USERNAME_MAX {
        return Err(ValidationError::UsernameTooLong);
    }
    if !input.as_bytes()[0].is_ascii_alphabetic() {
        return Err(ValidationError::UsernameBadStart);
    }
    if !input.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(ValidationError::UsernameNotAlphanumeric);
    }
    Ok(())
}

fn validate_fullname(input: &str) -> Result<(), ValidationError> {
    if input.len() < FULLNAME_MIN {
        Err(ValidationError::FullnameTooShort)
    } else if input.len() > FULLNAME_MAX {
        Err(ValidationError::FullnameTooLong)
    } else {
        Ok(())
    }
}

fn validate_email(input: &str) -> Result<(), ValidationError> {
    let (local, domain) = input.rsplit_once('@').ok_or(ValidationError::InvalidEmail)?;
    let dotted = domain
        .split('.')
        .filter(|label| !label.is_empty())
        .count()
        >= 2;
    if local.is_empty()
        || !dotted
        || domain.starts_with('.')
        || domain.ends_with('.')
        || input.chars().any(char::is_whitespace)
    {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(())
}

fn validate_address(address: &Address) -> Result<(), ValidationError> {
    if address.name.is_empty() {
        Err(ValidationError::MissingAddressField("Name"))
    } else if address.line1.is_empty() {
        Err(ValidationError::MissingAddressField("Line1"))
    } else if address.region.is_empty() {
        Err(ValidationError::MissingAddressField("Region"))
    } else if address.country.is_empty() {
        Err(ValidationError::MissingAddressField("Country"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: &str =
        r#"{"name": "Bob", "Line 1": "44 Bobstreet", "region": "Bobville", "country": "Bobland"}"#;

    fn body(username: &str, fullname: &str, email: &str) -> String {
        format!(
            r#"{{"username": "{}", "fullname": "{}", "email": "{}", "address": {}}}"#,
            username, fullname, email, ADDRESS
        )
    }

    #[test]
    fn test_invalid_json_rejected() {
        let inputs = [
            r#"{"Json}"#,
            r#"{"key": val}"#,
            r#"{key: "val"}"#,
            r#"{"key:" "val"}"#,
            r#"{"key": {"subkey": "subval}"#,
            "",
        ];
        for input in inputs {
            assert!(
                matches!(validate_user(input), Err(ValidationError::InvalidJson(_))),
                "accepted {:?}",
                input
            );
        }
    }

    #[test]
    fn test_missing_fields() {
        let missing_fullname = format!(
            r#"{{"username": "billy2000", "email": "Bob@bobmail.bob", "address": {}}}"#,
            ADDRESS
        );
        let err = validate_user(&missing_fullname).unwrap_err();
        assert_eq!(err.to_string(), "Fullname is a required field");

        let missing_username = format!(
            r#"{{"fullname": "billy bobson", "email": "Bob@bobmail.bob", "address": {}}}"#,
            ADDRESS
        );
        let err = validate_user(&missing_username).unwrap_err();
        assert_eq!(err.to_string(), "Username is a required field");

        let missing_email = format!(
            r#"{{"username": "bobman2000", "fullname": "billy bobson", "address": {}}}"#,
            ADDRESS
        );
        let err = validate_user(&missing_email).unwrap_err();
        assert_eq!(err.to_string(), "Email is a required field");
    }

    #[test]
    fn test_returns_lowercase_username() {
        for name in ["bIlLy2000", "BILLY2000", "billy2000"] {
            let username = validate_user(&body(name, "Billy Billy", "Bob@bobmail.bob")).unwrap();
            assert_eq!(username, "billy2000");
        }
    }

    #[test]
    fn test_username_rules() {
        for short in ["a", "aa", "aaaaaaa"] {
            assert!(matches!(
                validate_username(short),
                Err(ValidationError::UsernameTooShort)
            ));
        }
        assert!(matches!(
            validate_username(&"a".repeat(65)),
            Err(ValidationError::UsernameTooLong)
        ));
        assert!(matches!(
            validate_username("2000billy"),
            Err(ValidationError::UsernameBadStart)
        ));
        assert!(matches!(
            validate_username("_billy2000"),
            Err(ValidationError::UsernameBadStart)
        ));
        assert!(matches!(
            validate_username("billy-2000"),
            Err(ValidationError::UsernameNotAlphanumeric)
        ));

        for valid in ["bobman2000", "BOBman9000", "llll22222", "L33tBoaaa", "Joseph1111"] {
            assert!(validate_username(valid).is_ok(), "rejected {}", valid);
        }
        assert!(validate_username(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_fullname_length() {
        assert!(matches!(
            validate_fullname("Bo"),
            Err(ValidationError::FullnameTooShort)
        ));
        assert!(matches!(
            validate_fullname(&"b".repeat(129)),
            Err(ValidationError::FullnameTooLong)
        ));
        assert!(validate_fullname("Bob").is_ok());
    }

    #[test]
    fn test_email_rules() {
        for valid in ["bob@bobmail.com", "jc@unatco.org", "a.b+c@sub.domain.io"] {
            assert!(validate_email(valid).is_ok(), "rejected {}", valid);
        }
        for invalid in ["bobmail.com", "@bobmail.com", "bob@localhost", "bob@.com", "bob@mail.", "b ob@mail.com"] {
            assert!(validate_email(invalid).is_err(), "accepted {}", invalid);
        }
    }

    #[test]
    fn test_address_required_fields() {
        let no_address = r#"{"username": "billy2000", "fullname": "Billy Bob", "email": "b@b.io"}"#;
        let err = validate_user(no_address).unwrap_err();
        assert_eq!(err.to_string(), "Address Name is a required field");

        let no_country = r#"{"username": "billy2000", "fullname": "Billy Bob", "email": "b@b.io",
            "address": {"name": "Bob", "line 1": "44 Bobstreet", "region": "Bobville"}}"#;
        assert!(matches!(
            validate_user(no_country),
            Err(ValidationError::MissingAddressField("Country"))
        ));
    }

    #[test]
    fn test_line1_alias_normalized() {
        let user = parse_user(&body("billy2000", "Billy Bob", "b@b.io")).unwrap();
        assert_eq!(user.address.line1, "44 Bobstreet");

        let json = user.to_json();
        assert!(json.contains(r#""line 1":"44 Bobstreet""#));
        assert!(!json.contains("postcode"));
    }

    #[test]
    fn test_edit_keeps_username() {
        let edited = validate_edit("billy2000", &body("Billy2000", "Billy B. Bob", "b@b.io")).unwrap();
        assert_eq!(edited.username, "billy2000");
        assert_eq!(edited.fullname, "Billy B. Bob");

        assert!(matches!(
            validate_edit("billy2000", &body("jcdenton1", "JC Denton", "jc@unatco.org")),
            Err(ValidationError::UsernameChanged)
        ));
    }
}
