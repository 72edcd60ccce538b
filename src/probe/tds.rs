//! SQL Server reachability over TDS (via `tiberius`).

use anyhow::Context;
use async_trait::async_trait;
use tiberius::{AuthMethod, Client, Config, SqlBrowser};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::{DatabaseDriver, DatabaseTarget};

const APPLICATION_NAME: &str = "linkhub";

pub struct TdsDriver;

#[async_trait]
impl DatabaseDriver for TdsDriver {
    async fn open_and_close(&self, target: &DatabaseTarget) -> anyhow::Result<()> {
        let config = tds_config(target)?;
        let client = connect(config).await?;
        client.close().await.context("failed to close connection")?;
        Ok(())
    }
}

async fn connect(config: Config) -> anyhow::Result<Client<Compat<TcpStream>>> {
    // Resolves named instances through SQL Browser; plain TCP otherwise.
    let tcp = TcpStream::connect_named(&config).await?;
    tcp.set_nodelay(true)?;

    match Client::connect(config.clone(), tcp.compat_write()).await {
        Ok(client) => Ok(client),
        // Azure SQL gateways hand the login off to the node that owns the database.
        Err(tiberius::error::Error::Routing { host, port }) => {
            tracing::debug!(%host, port, "following TDS routing redirect");
            let mut config = config;
            config.host(&host);
            config.port(port);
            let tcp = TcpStream::connect(config.get_addr()).await?;
            tcp.set_nodelay(true)?;
            Ok(Client::connect(config, tcp.compat_write()).await?)
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn tds_config(target: &DatabaseTarget) -> anyhow::Result<Config> {
    let addr = ServerAddress::parse(&target.server)?;

    let mut config = Config::new();
    config.host(&addr.host);
    if let Some(port) = addr.port {
        config.port(port);
    }
    if let Some(instance) = &addr.instance {
        config.instance_name(instance);
    }
    config.database(&target.database);
    config.application_name(APPLICATION_NAME);

    match &target.credentials {
        Some(creds) => {
            config.authentication(AuthMethod::sql_server(&creds.username, creds.password.expose()))
        }
        None => integrated_auth(&mut config)?,
    }

    if target.trust_certificate {
        config.trust_cert();
    }
    Ok(config)
}

#[cfg(windows)]
fn integrated_auth(config: &mut Config) -> anyhow::Result<()> {
    config.authentication(AuthMethod::Integrated);
    Ok(())
}

#[cfg(not(windows))]
fn integrated_auth(_config: &mut Config) -> anyhow::Result<()> {
    anyhow::bail!("Windows authentication is not available on this host; use SQL authentication")
}

/// A `serverName` as users type it: `host`, `host,port`, `host\INSTANCE`,
/// optionally prefixed with `tcp:`.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ServerAddress {
    pub host: String,
    pub instance: Option<String>,
    pub port: Option<u16>,
}

impl ServerAddress {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut s = raw.trim();
        if s.len() >= 4 && s[..4].eq_ignore_ascii_case("tcp:") {
            s = &s[4..];
        }

        let (host_part, port) = match s.split_once(',') {
            Some((h, p)) => {
                let port = p
                    .trim()
                    .parse::<u16>()
                    .with_context(|| format!("invalid port in server name '{}'", raw))?;
                (h.trim(), Some(port))
            }
            None => (s, None),
        };

        let (host, instance) = match host_part.split_once('\\') {
            Some((h, i)) if !i.trim().is_empty() => (h.trim(), Some(i.trim().to_string())),
            Some((h, _)) => (h.trim(), None),
            None => (host_part, None),
        };

        if host.is_empty() {
            anyhow::bail!("server name '{}' has no host", raw);
        }

        let host = match host.to_ascii_lowercase().as_str() {
            "." | "(local)" | "(localdb)" => "localhost".to_string(),
            _ => host.to_string(),
        };

        Ok(Self {
            host,
            instance,
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::secret::Secret;
    use crate::probe::SqlCredentials;

    #[test]
    fn test_parse_plain_host() {
        let a = ServerAddress::parse("sql01.corp.local").unwrap();
        assert_eq!(a.host, "sql01.corp.local");
        assert_eq!(a.instance, None);
        assert_eq!(a.port, None);
    }

    #[test]
    fn test_parse_tcp_prefix_and_port() {
        let a = ServerAddress::parse("tcp:myserver.database.windows.net,1433").unwrap();
        assert_eq!(a.host, "myserver.database.windows.net");
        assert_eq!(a.port, Some(1433));
    }

    #[test]
    fn test_parse_named_instance() {
        let a = ServerAddress::parse(r".\SQLEXPRESS").unwrap();
        assert_eq!(a.host, "localhost");
        assert_eq!(a.instance.as_deref(), Some("SQLEXPRESS"));
    }

    #[test]
    fn test_parse_rejects_bad_port_and_empty_host() {
        assert!(ServerAddress::parse("host,notaport").is_err());
        assert!(ServerAddress::parse(",1433").is_err());
        assert!(ServerAddress::parse("   ").is_err());
    }

    #[test]
    fn test_config_uses_explicit_port() {
        let target = DatabaseTarget {
            server: "db.internal,14330".into(),
            database: "sales".into(),
            credentials: Some(SqlCredentials {
                username: "sa".into(),
                password: Secret::new("pw"),
            }),
            trust_certificate: true,
        };
        let config = tds_config(&target).unwrap();
        assert_eq!(config.get_addr(), "db.internal:14330");
    }

    #[cfg(not(windows))]
    #[test]
    fn test_integrated_auth_unavailable_off_windows() {
        let target = DatabaseTarget {
            server: "sql01".into(),
            database: "sales".into(),
            credentials: None,
            trust_certificate: true,
        };
        let err = tds_config(&target).unwrap_err();
        assert!(err.to_string().contains("Windows authentication"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_an_error() {
        // Port 1 on loopback refuses immediately.
        let target = DatabaseTarget {
            server: "127.0.0.1,1".into(),
            database: "sales".into(),
            credentials: Some(SqlCredentials {
                username: "sa".into(),
                password: Secret::new("pw"),
            }),
            trust_certificate: true,
        };
        assert!(TdsDriver.open_and_close(&target).await.is_err());
    }
}
