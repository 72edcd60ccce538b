//! Connection testing for linked services.
//!
//! A [`Probe`] is built from a service's stored settings and handed to the
//! [`ConnectionTester`], which always answers with a [`ProbeOutcome`]. Driver
//! errors, timeouts and even driver panics come back as `success: false`.

pub mod tds;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::models::secret::Secret;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub success: bool,
    pub message: String,
}

impl ProbeOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqlCredentials {
    pub username: String,
    pub password: Secret,
}

/// Where and how to reach a database. No credentials means integrated
/// (Windows) authentication.
#[derive(Debug, Clone)]
pub struct DatabaseTarget {
    pub server: String,
    pub database: String,
    pub credentials: Option<SqlCredentials>,
    pub trust_certificate: bool,
}

/// The closed set of checks, one per service type.
#[derive(Debug, Clone)]
pub enum Probe {
    Database(DatabaseTarget),
    AiKey(Secret),
}

/// Opens and immediately closes a database connection.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    async fn open_and_close(&self, target: &DatabaseTarget) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct ConnectionTester {
    driver: Arc<dyn DatabaseDriver>,
    connect_timeout: Duration,
}

impl ConnectionTester {
    pub fn new(driver: Arc<dyn DatabaseDriver>, connect_timeout: Duration) -> Self {
        Self {
            driver,
            connect_timeout,
        }
    }

    /// Tester backed by the SQL Server (TDS) driver.
    pub fn sql_server(connect_timeout: Duration) -> Self {
        Self::new(Arc::new(tds::TdsDriver), connect_timeout)
    }

    pub async fn run(&self, probe: &Probe) -> ProbeOutcome {
        match probe {
            Probe::Database(target) => self.probe_database(target).await,
            // Nothing to dial: the key is only checked for presence.
            Probe::AiKey(key) if key.is_empty() => ProbeOutcome::failure("AI API Key is empty"),
            Probe::AiKey(_) => ProbeOutcome::success("AI API Key configured"),
        }
    }

    async fn probe_database(&self, target: &DatabaseTarget) -> ProbeOutcome {
        let started = Instant::now();
        let driver = Arc::clone(&self.driver);
        let owned = target.clone();
        let mut task = tokio::spawn(async move { driver.open_and_close(&owned).await });

        let outcome = match tokio::time::timeout(self.connect_timeout, &mut task).await {
            Ok(Ok(Ok(()))) => ProbeOutcome::success("Connection successful"),
            Ok(Ok(Err(e))) => ProbeOutcome::failure(format!("{:#}", e)),
            Ok(Err(join_err)) => {
                tracing::error!(error = %join_err, "database driver task failed");
                ProbeOutcome::failure(format!("database driver failed: {}", join_err))
            }
            Err(_) => {
                task.abort();
                ProbeOutcome::failure(format!(
                    "Connection timed out after {} seconds",
                    self.connect_timeout.as_secs_f64()
                ))
            }
        };

        tracing::info!(
            server = %target.server,
            database = %target.database,
            sql_auth = target.credentials.is_some(),
            success = outcome.success,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "database probe finished"
        );
        outcome
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// What the scripted driver does on its next call.
    #[derive(Debug, Clone)]
    pub enum Step {
        Succeed,
        Fail(&'static str),
        Hang,
        Panic,
    }

    /// Driver that replays a script, then keeps repeating the last step.
    pub struct ScriptedDriver {
        steps: Mutex<VecDeque<Step>>,
        last: Mutex<Step>,
        pub calls: Mutex<Vec<DatabaseTarget>>,
    }

    impl ScriptedDriver {
        pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into_iter().collect()),
                last: Mutex::new(Step::Succeed),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl DatabaseDriver for ScriptedDriver {
        async fn open_and_close(&self, target: &DatabaseTarget) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(target.clone());
            let step = {
                let mut steps = self.steps.lock().unwrap();
                let mut last = self.last.lock().unwrap();
                if let Some(next) = steps.pop_front() {
                    *last = next;
                }
                last.clone()
            };
            match step {
                Step::Succeed => Ok(()),
                Step::Fail(msg) => Err(anyhow::anyhow!(msg)),
                Step::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
                Step::Panic => panic!("driver exploded"),
            }
        }
    }
}
