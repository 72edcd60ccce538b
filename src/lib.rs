//! linkhub — linked service registry and sandboxed code runner.
//!
//! The binary in `main.rs` wires these modules into an axum server; the
//! library split exists so integration tests in `tests/` can drive the router.

pub mod api;
pub mod config;
pub mod errors;
pub mod models;
pub mod probe;
pub mod registry;
pub mod sandbox;

use probe::ConnectionTester;
use registry::ServiceRegistry;
use sandbox::CodeSandbox;

/// Shared application state passed to handlers.
pub struct AppState {
    pub registry: ServiceRegistry,
    pub sandbox: CodeSandbox,
    pub config: config::Config,
}

impl AppState {
    pub fn new(config: config::Config, tester: ConnectionTester) -> Self {
        Self {
            registry: ServiceRegistry::new(tester),
            sandbox: CodeSandbox::from_config(&config),
            config,
        }
    }

    /// State backed by the real SQL Server driver.
    pub fn from_config(config: config::Config) -> Self {
        let tester = ConnectionTester::sql_server(config.db_connect_timeout);
        Self::new(config, tester)
    }
}
