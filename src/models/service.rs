use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::{EventLevel, EventLog};
use super::secret::Secret;
use crate::errors::AppError;
use crate::probe::{DatabaseTarget, Probe, ProbeOutcome, SqlCredentials};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    #[default]
    Db,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticationType {
    #[default]
    Windows,
    Sql,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Success,
    Failed,
}

impl From<bool> for ConnectionStatus {
    fn from(success: bool) -> Self {
        if success {
            ConnectionStatus::Success
        } else {
            ConnectionStatus::Failed
        }
    }
}

/// Connection settings for a SQL Server database.
///
/// `username`/`password` are only ever populated when
/// `authentication_type` is [`AuthenticationType::Sql`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSettings {
    pub server_name: String,
    pub database_name: String,
    pub authentication_type: AuthenticationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(
        serialize_with = "Secret::serialize_exposed_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub password: Option<Secret>,
    pub trust_server_certificate: bool,
}

impl DatabaseSettings {
    fn normalize_credentials(&mut self) {
        if self.authentication_type == AuthenticationType::Windows {
            self.username = None;
            self.password = None;
        }
    }

    fn target(&self) -> DatabaseTarget {
        let credentials = match (&self.username, &self.password) {
            (Some(u), Some(p)) if !u.trim().is_empty() && !p.is_empty() => Some(SqlCredentials {
                username: u.clone(),
                password: p.clone(),
            }),
            _ => None,
        };
        DatabaseTarget {
            server: self.server_name.clone(),
            database: self.database_name.clone(),
            credentials,
            trust_certificate: self.trust_server_certificate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiSettings {
    #[serde(serialize_with = "Secret::serialize_exposed")]
    pub ai_api_key: Secret,
}

/// Type-specific settings, tagged on the wire by `serviceType`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "serviceType", rename_all = "lowercase")]
pub enum ServiceSettings {
    Db(DatabaseSettings),
    Ai(AiSettings),
}

impl ServiceSettings {
    pub fn service_type(&self) -> ServiceType {
        match self {
            ServiceSettings::Db(_) => ServiceType::Db,
            ServiceSettings::Ai(_) => ServiceType::Ai,
        }
    }

    pub fn probe(&self) -> Probe {
        match self {
            ServiceSettings::Db(db) => Probe::Database(db.target()),
            ServiceSettings::Ai(ai) => Probe::AiKey(ai.ai_api_key.clone()),
        }
    }
}

/// A registered external database connection or AI credential.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedService {
    pub id: u64,
    pub name: String,
    pub description: String,
    #[serde(flatten)]
    pub settings: ServiceSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_status: Option<ConnectionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tested_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub events: EventLog,
    /// Sequence number of the probe whose outcome is currently stored.
    #[serde(skip)]
    pub(crate) probe_ticket: u64,
}

impl LinkedService {
    pub fn service_type(&self) -> ServiceType {
        self.settings.service_type()
    }

    pub(crate) fn log(&mut self, level: EventLevel, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(service_id = self.id, ?level, %message, "event appended");
        self.events.append(level, message);
    }

    /// Stores a probe outcome unless a newer probe already wrote one.
    /// Returns whether the status fields were updated.
    pub(crate) fn record_outcome(&mut self, ticket: u64, outcome: &ProbeOutcome) -> bool {
        if ticket < self.probe_ticket {
            return false;
        }
        self.probe_ticket = ticket;
        self.connection_status = Some(outcome.success.into());
        self.connection_message = Some(outcome.message.clone());
        true
    }

    /// Event emitted after a create or update probe.
    pub(crate) fn log_test_result(&mut self, outcome: &ProbeOutcome) {
        if outcome.success {
            let msg = format!("Connection test passed for '{}'.", self.name);
            self.log(EventLevel::Info, msg);
        } else {
            let msg = format!(
                "Connection test failed for '{}': {}",
                self.name, outcome.message
            );
            self.log(EventLevel::Error, msg);
        }
    }

    /// Validates `patch` against the current state and applies it.
    ///
    /// Returns `true` when the patch touched enough connection settings to
    /// warrant a new probe. On error `self` is left as it was.
    pub(crate) fn apply_patch(&mut self, patch: ServicePatch) -> Result<bool, AppError> {
        let name = match patch.name {
            Some(n) => Some(non_empty(Some(n)).ok_or_else(|| {
                AppError::validation("Field 'name' must not be empty")
            })?),
            None => None,
        };

        let target_type = patch.service_type.unwrap_or_else(|| self.service_type());
        let (settings, retest) = match (&self.settings, target_type) {
            (ServiceSettings::Db(current), ServiceType::Db) => {
                let mut db = current.clone();
                let retest = patch.server_name.is_some() && patch.database_name.is_some();
                if let Some(server) = patch.server_name {
                    db.server_name = non_empty(Some(server)).ok_or_else(|| {
                        AppError::validation("Field 'serverName' must not be empty")
                    })?;
                }
                if let Some(database) = patch.database_name {
                    db.database_name = non_empty(Some(database)).ok_or_else(|| {
                        AppError::validation("Field 'databaseName' must not be empty")
                    })?;
                }
                if let Some(auth) = patch.authentication_type {
                    db.authentication_type = auth;
                }
                if let Some(username) = patch.username {
                    db.username = Some(username);
                }
                if let Some(password) = patch.password {
                    db.password = Some(password);
                }
                if let Some(trust) = patch.trust_server_certificate {
                    db.trust_server_certificate = trust;
                }
                db.normalize_credentials();
                (ServiceSettings::Db(db), retest)
            }
            (ServiceSettings::Ai(current), ServiceType::Ai) => match patch.ai_api_key {
                Some(key) => {
                    let ai = AiSettings {
                        ai_api_key: required_key(key)?,
                    };
                    (ServiceSettings::Ai(ai), true)
                }
                None => (ServiceSettings::Ai(current.clone()), false),
            },
            // Switching type needs the new variant's required fields up front.
            (_, ServiceType::Db) => {
                let db = database_settings(
                    patch.server_name,
                    patch.database_name,
                    patch.authentication_type,
                    patch.username,
                    patch.password,
                    patch.trust_server_certificate,
                )?;
                (ServiceSettings::Db(db), true)
            }
            (_, ServiceType::Ai) => {
                let key = patch
                    .ai_api_key
                    .ok_or_else(|| AppError::validation("Missing required field: aiApiKey"))?;
                let ai = AiSettings {
                    ai_api_key: required_key(key)?,
                };
                (ServiceSettings::Ai(ai), true)
            }
        };

        if let Some(name) = name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        self.settings = settings;
        Ok(retest)
    }
}

/// Creation payload. Every field is optional at the type level so that
/// missing fields surface as validation errors rather than decode errors.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub name: Option<String>,
    pub description: Option<String>,
    pub service_type: Option<ServiceType>,
    pub server_name: Option<String>,
    pub database_name: Option<String>,
    pub authentication_type: Option<AuthenticationType>,
    pub username: Option<String>,
    pub password: Option<Secret>,
    pub trust_server_certificate: Option<bool>,
    pub ai_api_key: Option<Secret>,
}

/// Partial update: absent fields keep their stored value.
pub type ServicePatch = ServiceDescriptor;

/// A descriptor that passed validation, waiting for an id.
#[derive(Debug, Clone)]
pub(crate) struct ValidatedService {
    pub name: String,
    pub description: String,
    pub settings: ServiceSettings,
}

impl ServiceDescriptor {
    pub(crate) fn validate(self) -> Result<ValidatedService, AppError> {
        let name = non_empty(self.name)
            .ok_or_else(|| AppError::validation("Missing required field: name"))?;

        let settings = match self.service_type.unwrap_or_default() {
            ServiceType::Db => ServiceSettings::Db(database_settings(
                self.server_name,
                self.database_name,
                self.authentication_type,
                self.username,
                self.password,
                self.trust_server_certificate,
            )?),
            ServiceType::Ai => {
                let key = self
                    .ai_api_key
                    .ok_or_else(|| AppError::validation("Missing required field: aiApiKey"))?;
                ServiceSettings::Ai(AiSettings {
                    ai_api_key: required_key(key)?,
                })
            }
        };

        Ok(ValidatedService {
            name,
            description: self.description.unwrap_or_default(),
            settings,
        })
    }
}

fn database_settings(
    server_name: Option<String>,
    database_name: Option<String>,
    authentication_type: Option<AuthenticationType>,
    username: Option<String>,
    password: Option<Secret>,
    trust_server_certificate: Option<bool>,
) -> Result<DatabaseSettings, AppError> {
    let (Some(server_name), Some(database_name)) = (non_empty(server_name), non_empty(database_name))
    else {
        return Err(AppError::validation(
            "Missing required fields: serverName, databaseName",
        ));
    };

    let mut db = DatabaseSettings {
        server_name,
        database_name,
        authentication_type: authentication_type.unwrap_or_default(),
        username,
        password,
        trust_server_certificate: trust_server_certificate.unwrap_or(true),
    };
    db.normalize_credentials();
    Ok(db)
}

fn required_key(key: Secret) -> Result<Secret, AppError> {
    if key.is_empty() {
        return Err(AppError::validation("Missing required field: aiApiKey"));
    }
    Ok(key)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
