//! Form-fill policy
//!
//! Decides the values typed into form fields before an action inside a form
//! is fired. Every mode is deterministic for a given field, so that revisiting
//! an equivalent state produces the same page and the same fingerprint.

use crate::config::{FormFillMode, FormInputEntry};
use rand::distr::Alphanumeric;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// A form control found next to an action candidate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormField {
    /// Unique CSS selector of the control
    pub selector: String,
    pub name: Option<String>,
    pub id: Option<String>,
    /// `input` type (`text`, `email`, `checkbox`...), `textarea` or `select`
    pub field_type: String,
    /// Option values of a `select`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl FormField {
    /// Stable identity of the field, independent of its current value
    pub fn signature(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.field_type,
            self.name.as_deref().unwrap_or(""),
            self.id.as_deref().unwrap_or(""),
            self.selector
        )
    }

    fn hint(&self) -> String {
        format!(
            "{} {}",
            self.name.as_deref().unwrap_or(""),
            self.id.as_deref().unwrap_or("")
        )
        .to_lowercase()
    }
}

/// The value put into a field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    Text(String),
    Checked(bool),
    Select(String),
}

/// A field together with the value to put into it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilledInput {
    pub selector: String,
    pub value: FieldValue,
}

/// Chooses field values according to the configured fill mode
#[derive(Debug, Clone)]
pub struct FormFillPolicy {
    mode: FormFillMode,
    manual: HashMap<String, String>,
    seed: u64,
}

impl FormFillPolicy {
    /// Creates a policy
    ///
    /// # Arguments
    ///
    /// * `mode` - The fill mode
    /// * `inputs` - `[[form-input]]` entries keyed by field name or id
    /// * `seed` - Mixed into random values
    pub fn new(mode: FormFillMode, inputs: &[FormInputEntry], seed: u64) -> Self {
        let manual = inputs
            .iter()
            .map(|entry| (entry.field.clone(), entry.value.clone()))
            .collect();

        Self { mode, manual, seed }
    }

    pub fn mode(&self) -> FormFillMode {
        self.mode
    }

    /// Computes the values for a set of fields
    ///
    /// Fields the policy has nothing for (manual mode without an entry, a
    /// select without options) are left untouched and omitted. Only the first
    /// radio button of each group is selected.
    pub fn fill(&self, fields: &[FormField]) -> Vec<FilledInput> {
        let mut radio_groups = HashSet::new();

        fields
            .iter()
            .filter(|field| {
                field.field_type != "radio"
                    || radio_groups.insert(field.name.clone().unwrap_or_default())
            })
            .filter_map(|field| {
                let value = match self.mode {
                    FormFillMode::Normal => normal_value(field),
                    FormFillMode::Random => random_value(field, self.seed),
                    FormFillMode::Manual => self.manual_value(field),
                }?;
                Some(FilledInput {
                    selector: field.selector.clone(),
                    value,
                })
            })
            .collect()
    }

    fn manual_value(&self, field: &FormField) -> Option<FieldValue> {
        let value = field
            .name
            .as_ref()
            .and_then(|name| self.manual.get(name))
            .or_else(|| field.id.as_ref().and_then(|id| self.manual.get(id)))?;

        Some(match field.field_type.as_str() {
            "checkbox" | "radio" => FieldValue::Checked(matches!(
                value.to_lowercase().as_str(),
                "true" | "on" | "yes" | "1" | "checked"
            )),
            "select" => FieldValue::Select(value.clone()),
            _ => FieldValue::Text(value.clone()),
        })
    }
}

fn normal_value(field: &FormField) -> Option<FieldValue> {
    let text = |s: &str| Some(FieldValue::Text(s.to_string()));

    match field.field_type.as_str() {
        "checkbox" | "radio" => return Some(FieldValue::Checked(true)),
        "select" => {
            return field
                .options
                .iter()
                .find(|v| !v.is_empty())
                .map(|v| FieldValue::Select(v.clone()))
        }
        "email" => return text("crawler@example.com"),
        "number" | "range" => return text("42"),
        "tel" => return text("5551234567"),
        "url" => return text("https://example.com/"),
        "date" => return text("2024-01-01"),
        "time" => return text("12:00"),
        "color" => return text("#336699"),
        "password" => return text("Passw0rd!"),
        _ => {}
    }

    let hint = field.hint();
    if hint.contains("mail") {
        text("crawler@example.com")
    } else if hint.contains("phone") || has_word(&hint, "tel") {
        text("5551234567")
    } else if hint.contains("zip") || hint.contains("postal") {
        text("12345")
    } else if has_word(&hint, "age") || hint.contains("qty") || hint.contains("quantity") {
        text("42")
    } else if hint.contains("user") || hint.contains("login") {
        text("crawler")
    } else if hint.contains("name") {
        text("Test User")
    } else if hint.contains("url") || hint.contains("website") {
        text("https://example.com/")
    } else if field.field_type == "textarea" {
        text("Sample text entered by the crawler.")
    } else {
        text("test")
    }
}

/// Returns true if `word` appears in `hint` as a whole word (`user_age`,
/// `age`, but not `page` or `message`)
fn has_word(hint: &str, word: &str) -> bool {
    hint.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|part| part == word)
}

fn random_value(field: &FormField, seed: u64) -> Option<FieldValue> {
    let digest = Sha256::digest(field.signature().as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let mut rng = StdRng::seed_from_u64(u64::from_le_bytes(prefix) ^ seed);

    let word = |rng: &mut StdRng, len: usize| -> String {
        rng.sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    };

    Some(match field.field_type.as_str() {
        "checkbox" | "radio" => FieldValue::Checked(rng.random_bool(0.5)),
        "select" => {
            let choices: Vec<&String> = field.options.iter().filter(|v| !v.is_empty()).collect();
            FieldValue::Select(choices.choose(&mut rng)?.to_string())
        }
        "email" => FieldValue::Text(format!("{}@example.com", word(&mut rng, 8).to_lowercase())),
        "number" | "range" => FieldValue::Text(rng.random_range(0..1000).to_string()),
        "tel" => FieldValue::Text(format!("555{:07}", rng.random_range(0..10_000_000))),
        "url" => FieldValue::Text(format!("https://{}.example.com/", word(&mut rng, 6).to_lowercase())),
        "date" => FieldValue::Text(format!(
            "20{:02}-{:02}-{:02}",
            rng.random_range(0..30),
            rng.random_range(1..13),
            rng.random_range(1..29)
        )),
        "textarea" => FieldValue::Text(word(&mut rng, 32)),
        _ => FieldValue::Text(word(&mut rng, 10)),
    })
}
