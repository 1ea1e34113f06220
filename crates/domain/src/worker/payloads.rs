//! Payloads handed to each participant service.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::MAX_USERNAME_LEN;
use crate::error::ValidationError;

/// Employment contract attached to the person record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDetails {
    /// Contract kind as understood by the people service (e.g. "permanent").
    pub contract_type: String,
    /// First working day, if already known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
}

/// What the people/HR service needs to create the person and contract record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonPayload {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<ContractDetails>,
}

impl PersonPayload {
    /// Creates a payload with only the required name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_name: None,
            document_number: None,
            email: None,
            contract: None,
        }
    }

    /// Sets the contract details.
    pub fn with_contract(mut self, contract: ContractDetails) -> Self {
        self.contract = Some(contract);
        self
    }

    /// Sets the contact email.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Checks the fields the people service requires.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::missing("personPayload.name"));
        }
        if let Some(doc) = &self.document_number
            && doc.trim().is_empty()
        {
            return Err(ValidationError::invalid(
                "personPayload.documentNumber",
                "must not be blank when present",
            ));
        }
        if let Some(email) = &self.email {
            validate_email("personPayload.email", email)?;
        }
        if let Some(contract) = &self.contract
            && contract.contract_type.trim().is_empty()
        {
            return Err(ValidationError::missing("personPayload.contract.contractType"));
        }
        Ok(())
    }
}

/// What the security service needs to create the login account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPayload {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

impl SecurityPayload {
    /// Creates a payload with only the required username.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: None,
            roles: Vec::new(),
        }
    }

    /// Adds a role to grant on the new account.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Checks the fields the security service requires.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let username = self.username.trim();
        if username.is_empty() {
            return Err(ValidationError::missing("securityPayload.username"));
        }
        if self.username.chars().any(char::is_whitespace) {
            return Err(ValidationError::invalid(
                "securityPayload.username",
                "must not contain whitespace",
            ));
        }
        if self.username.chars().count() > MAX_USERNAME_LEN {
            return Err(ValidationError::invalid(
                "securityPayload.username",
                format!("must be at most {MAX_USERNAME_LEN} characters"),
            ));
        }
        if let Some(email) = &self.email {
            validate_email("securityPayload.email", email)?;
        }
        if self.roles.iter().any(|r| r.trim().is_empty()) {
            return Err(ValidationError::invalid(
                "securityPayload.roles",
                "role names must not be blank",
            ));
        }
        Ok(())
    }
}

fn validate_email(field: &'static str, email: &str) -> Result<(), ValidationError> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(ValidationError::invalid(field, "not an email address")),
    }
}
