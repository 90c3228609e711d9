use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

/// Field name → messages, in the order checks added them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FormErrors(BTreeMap<String, Vec<String>>);

impl FormErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    /// First message for `field`.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(|m| m.first()).map(String::as_str)
    }

    pub fn all(&self, field: &str) -> &[String] {
        self.0.get(field).map_or(&[], Vec::as_slice)
    }

    pub fn fields(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Submitted form values plus the errors collected by the checks run on them.
/// Checks never short-circuit.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Form {
    values: HashMap<String, String>,
    pub errors: FormErrors,
}

impl Form {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self {
            values,
            errors: FormErrors::default(),
        }
    }

    /// Value of `field`, empty when absent.
    pub fn get(&self, field: &str) -> &str {
        self.values.get(field).map_or("", String::as_str)
    }

    pub fn required(&mut self, fields: &[&str]) {
        for field in fields {
            if self.get(field).trim().is_empty() {
                self.errors.add(field, "This field cannot be blank");
            }
        }
    }

    pub fn min_length(&mut self, field: &str, length: usize) -> bool {
        if self.get(field).trim().chars().count() < length {
            self.errors
                .add(field, format!("This field must be at least {length} characters long"));
            return false;
        }
        true
    }

    pub fn max_length(&mut self, field: &str, length: usize) -> bool {
        if self.get(field).chars().count() > length {
            self.errors
                .add(field, format!("This field must be at most {length} characters long"));
            return false;
        }
        true
    }

    pub fn is_email(&mut self, field: &str) {
        if !is_valid_email(self.get(field).trim()) {
            self.errors.add(field, "Invalid email address");
        }
    }

    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// `local@domain` with one `@`, a dotted domain of non-empty labels that
/// neither start nor end with `-`, and a conservative local-part alphabet.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 3 || email.len() > 254 {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || local.len() > 64 || domain.contains('@') {
        return false;
    }
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return false;
    }
    let local_ok = local
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-/=?^_`{|}~.".contains(c));
    if !local_ok {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    labels.iter().all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(pairs: &[(&str, &str)]) -> Form {
        Form::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn required_flags_blank_and_missing() {
        let mut f = form(&[("first_name", "   "), ("last_name", "Arman")]);
        f.required(&["first_name", "last_name", "email"]);
        assert!(!f.valid());
        assert_eq!(f.errors.fields(), ["email", "first_name"]);
        assert_eq!(f.errors.get("email"), Some("This field cannot be blank"));
    }

    #[test]
    fn min_length_boundary() {
        let mut f = form(&[("first_name", "Mu")]);
        assert!(!f.min_length("first_name", 3));
        let mut f = form(&[("first_name", "Mub")]);
        assert!(f.min_length("first_name", 3));
        assert!(f.valid());
    }

    #[test]
    fn min_length_counts_chars_not_bytes() {
        let mut f = form(&[("first_name", "Zoë")]);
        assert!(f.min_length("first_name", 3));
        let mut f = form(&[("first_name", "éé")]);
        assert!(!f.min_length("first_name", 3));
    }

    #[test]
    fn errors_accumulate_per_field() {
        let mut f = form(&[("email", "")]);
        f.required(&["email"]);
        f.is_email("email");
        assert_eq!(f.errors.all("email").len(), 2);
        assert_eq!(f.errors.all("phone").len(), 0);
    }

    #[test]
    fn valid_emails() {
        for email in [
            "mubeenarman19@gmail.com",
            "user.name+tag@sub.example.co.uk",
            "a@b.co",
            "o'brien@example.ie",
        ] {
            assert!(is_valid_email(email), "{email}");
        }
    }

    #[test]
    fn invalid_emails() {
        for email in [
            "",
            "not-an-email",
            "@example.com",
            "user@",
            "user@@example.com",
            "user@example",
            "user@.com",
            "user@example..com",
            "user@-example.com",
            ".user@example.com",
            "us..er@example.com",
            "us er@example.com",
        ] {
            assert!(!is_valid_email(email), "{email}");
        }
    }

    #[test]
    fn errors_serialize_as_map() {
        let mut e = FormErrors::default();
        e.add("email", "Invalid email address");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["email"][0], "Invalid email address");
    }
}
