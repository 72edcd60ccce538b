//! Service Registry — in-memory store of linked services.
//!
//! The registry manages the service lifecycle:
//! - Validation and id assignment on create
//! - Connection probes on create, update and explicit test
//! - The per-service audit trail
//!
//! All state sits behind one mutex. Probes run with the lock released; each
//! probe takes a ticket while the lock is held so a slow, older probe can
//! never overwrite the status written by a newer one.

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::errors::AppError;
use crate::models::event::{EventLevel, EventLog};
use crate::models::service::{LinkedService, ServiceDescriptor, ServicePatch};
use crate::probe::ConnectionTester;

struct Inner {
    next_id: u64,
    next_ticket: u64,
    services: Vec<LinkedService>,
}

impl Inner {
    fn find_mut(&mut self, id: u64) -> Option<&mut LinkedService> {
        self.services.iter_mut().find(|s| s.id == id)
    }

    fn take_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }
}

/// Result of an explicit connection test.
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub success: bool,
    pub message: String,
    pub service: LinkedService,
}

pub struct ServiceRegistry {
    inner: Mutex<Inner>,
    tester: ConnectionTester,
}

impl ServiceRegistry {
    pub fn new(tester: ConnectionTester) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                // Ticket 0 belongs to the probe run during create.
                next_ticket: 1,
                services: Vec::new(),
            }),
            tester,
        }
    }

    /// All services in creation order.
    pub async fn list(&self) -> Vec<LinkedService> {
        self.inner.lock().await.services.clone()
    }

    #[cfg(test)]
    pub async fn get(&self, id: u64) -> Option<LinkedService> {
        self.inner
            .lock()
            .await
            .services
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.lock().await.services.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Validate, probe, then insert under a freshly assigned id.
    pub async fn create(&self, descriptor: ServiceDescriptor) -> Result<LinkedService, AppError> {
        let validated = descriptor.validate()?;

        let mut service = LinkedService {
            id: 0,
            name: validated.name,
            description: validated.description,
            settings: validated.settings,
            connection_status: None,
            connection_message: None,
            last_tested_at: None,
            created_at: Utc::now(),
            events: EventLog::new(),
            probe_ticket: 0,
        };
        let created_msg = format!("Service '{}' created successfully.", service.name);
        service.events.append(EventLevel::Info, created_msg);

        let outcome = self.tester.run(&service.settings.probe()).await;
        service.record_outcome(0, &outcome);
        service.log_test_result(&outcome);

        let mut inner = self.inner.lock().await;
        service.id = inner.next_id;
        inner.next_id += 1;
        inner.services.push(service.clone());
        drop(inner);

        tracing::info!(
            service_id = service.id,
            name = %service.name,
            service_type = ?service.service_type(),
            connected = outcome.success,
            "linked service created"
        );
        Ok(service)
    }

    /// Apply a partial update, re-probing when connection settings changed.
    ///
    /// The lock is released while the probe runs, so a concurrent `test` may
    /// append its event between this call's "configuration updated" and
    /// test-result events. The returned entity carries whichever outcome holds
    /// the newest ticket, which can be the concurrent test's.
    pub async fn update(&self, id: u64, patch: ServicePatch) -> Result<LinkedService, AppError> {
        let (probe, ticket) = {
            let mut inner = self.inner.lock().await;
            let service = inner.find_mut(id).ok_or(AppError::NotFound(id))?;

            let mut next = service.clone();
            let retest = next.apply_patch(patch)?;
            *service = next;
            let msg = format!("Service '{}' configuration updated.", service.name);
            service.log(EventLevel::Info, msg);

            if !retest {
                tracing::info!(service_id = id, "linked service updated");
                return Ok(service.clone());
            }
            let probe = service.settings.probe();
            (probe, inner.take_ticket())
        };

        let outcome = self.tester.run(&probe).await;

        let mut inner = self.inner.lock().await;
        let Some(service) = inner.find_mut(id) else {
            tracing::warn!(service_id = id, "service deleted while its update probe was running");
            return Err(AppError::NotFound(id));
        };
        service.record_outcome(ticket, &outcome);
        service.log_test_result(&outcome);

        tracing::info!(
            service_id = id,
            connected = outcome.success,
            "linked service updated and re-tested"
        );
        Ok(service.clone())
    }

    /// Re-run the probe against the stored settings.
    pub async fn test(&self, id: u64) -> Result<TestReport, AppError> {
        let (probe, ticket) = {
            let mut inner = self.inner.lock().await;
            let service = inner.find_mut(id).ok_or(AppError::NotFound(id))?;
            let probe = service.settings.probe();
            (probe, inner.take_ticket())
        };

        let outcome = self.tester.run(&probe).await;

        let mut inner = self.inner.lock().await;
        let service = inner.find_mut(id).ok_or(AppError::NotFound(id))?;
        service.record_outcome(ticket, &outcome);
        service.last_tested_at = Some(Utc::now());

        let (level, verdict) = if outcome.success {
            (EventLevel::Info, "passed")
        } else {
            (EventLevel::Error, "failed")
        };
        let msg = format!(
            "Connection test {} for '{}': {}",
            verdict, service.name, outcome.message
        );
        service.log(level, msg);

        tracing::info!(service_id = id, connected = outcome.success, "connection test finished");
        Ok(TestReport {
            success: outcome.success,
            message: outcome.message,
            service: service.clone(),
        })
    }

    /// Remove a service. Unknown ids are not an error.
    pub async fn delete(&self, id: u64) -> bool {
        let mut inner = self.inner.lock().await;
        let before = inner.services.len();
        inner.services.retain(|s| s.id != id);
        let removed = inner.services.len() != before;
        tracing::info!(service_id = id, removed, "linked service delete");
        removed
    }
}
