use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

const MAX_TEXT_LEN: usize = 255;
const PHONE_DIGITS: usize = 11;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
});

/// A contact request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub age: u16,
    pub gender: char,
}

impl Submission {
    /// Gender as the `GENDER` enum code: the submitted letter, upper-cased.
    pub fn gender_code(&self) -> String {
        self.gender.to_uppercase().collect()
    }
}

/// Raw form body, as posted by the page or a JSON client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmissionForm {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "text_or_number")]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "text_or_number")]
    pub age: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("the given data was invalid ({} field(s))", .errors.len())]
pub struct ValidationError {
    pub errors: BTreeMap<&'static str, Vec<String>>,
}

#[derive(Default)]
struct Collector {
    errors: BTreeMap<&'static str, Vec<String>>,
}

impl Collector {
    fn push(&mut self, field: &'static str, message: String) {
        self.errors.entry(field).or_default().push(message);
    }

    /// Trimmed value, or a "required" error.
    fn required(&mut self, field: &'static str, value: Option<String>) -> Option<String> {
        match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            Some(v) => Some(v),
            None => {
                self.push(field, format!("The {} field is required.", label(field)));
                None
            }
        }
    }

    fn max_len(&mut self, field: &'static str, value: &str) -> bool {
        if value.chars().count() > MAX_TEXT_LEN {
            self.push(
                field,
                format!(
                    "The {} must not be greater than {} characters.",
                    label(field),
                    MAX_TEXT_LEN
                ),
            );
            return false;
        }
        true
    }
}

fn label(field: &str) -> String {
    field.replace('_', " ")
}

fn all_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

impl SubmissionForm {
    pub fn validate(self) -> Result<Submission, ValidationError> {
        let mut c = Collector::default();

        let first_name = c
            .required("first_name", self.first_name)
            .filter(|v| c.max_len("first_name", v));
        let last_name = c
            .required("last_name", self.last_name)
            .filter(|v| c.max_len("last_name", v));

        let email = c.required("email", self.email).filter(|v| {
            if !c.max_len("email", v) {
                return false;
            }
            if !EMAIL_RE.is_match(v) {
                c.push("email", "The email must be a valid email address.".to_string());
                return false;
            }
            true
        });

        let phone = c.required("phone", self.phone).filter(|v| {
            if all_digits(v) && v.len() == PHONE_DIGITS {
                return true;
            }
            c.push("phone", format!("The phone must be {} digits.", PHONE_DIGITS));
            false
        });

        let age = c.required("age", self.age).and_then(|v| {
            if !all_digits(&v) || v.len() > 3 {
                c.push("age", "The age must be between 1 and 3 digits.".to_string());
                return None;
            }
            match v.parse::<u16>() {
                Ok(n) if n > 0 => Some(n),
                _ => {
                    c.push("age", "The age must be greater than 0.".to_string());
                    None
                }
            }
        });

        let gender = c.required("gender", self.gender).and_then(|v| {
            let mut chars = v.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) => Some(ch),
                _ => {
                    c.push("gender", "The gender must be a single character.".to_string());
                    None
                }
            }
        });

        match (first_name, last_name, email, phone, age, gender) {
            (Some(first_name), Some(last_name), Some(email), Some(phone), Some(age), Some(gender))
                if c.errors.is_empty() =>
            {
                Ok(Submission {
                    first_name,
                    last_name,
                    email,
                    phone,
                    age,
                    gender,
                })
            }
            _ => Err(ValidationError { errors: c.errors }),
        }
    }
}

/// Accepts `"42"` as well as `42`; JSON clients tend to send numbers.
fn text_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    }))
}
