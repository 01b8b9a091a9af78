//! Operator-supplied values for `$user_input` placeholders
//!
//! Values are looked up per action (by idempotency key) first, then in the
//! global table keyed by prompt.

use porter_core::placeholder::fill_user_inputs;
use porter_core::{Action, IdempotencyKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Prompt → value tables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInputs {
    /// Answers shared by every action
    #[serde(default)]
    pub global: BTreeMap<String, Value>,
    /// Answers for one action, keyed by idempotency key
    #[serde(default)]
    pub actions: BTreeMap<IdempotencyKey, BTreeMap<String, Value>>,
}

impl UserInputs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `prompt` for every action
    #[must_use]
    pub fn with_global(mut self, prompt: impl Into<String>, value: Value) -> Self {
        self.global.insert(prompt.into(), value);
        self
    }

    /// Answer `prompt` for the action with `key`
    #[must_use]
    pub fn with_action(mut self, key: IdempotencyKey, prompt: impl Into<String>, value: Value) -> Self {
        self.actions.entry(key).or_default().insert(prompt.into(), value);
        self
    }

    /// Load from a JSON document `{"global": {...}, "actions": {...}}`
    ///
    /// # Errors
    /// Returns error on malformed JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    fn answers_for(&self, action: &Action) -> BTreeMap<String, Value> {
        let mut answers = self.global.clone();
        if let Some(specific) = self.actions.get(&action.idempotency_key) {
            answers.extend(specific.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        answers
    }

    /// Copy of `action` with every placeholder filled
    ///
    /// Actions that need no input are returned unchanged.
    ///
    /// # Errors
    /// Returns the first prompt without an answer
    pub fn prepare(&self, action: &Action) -> Result<Action, String> {
        let mut prepared = action.clone();
        if action.requires_user_input {
            prepared.parameters = fill_user_inputs(&action.parameters, &self.answers_for(action))?;
        }
        Ok(prepared)
    }
}
