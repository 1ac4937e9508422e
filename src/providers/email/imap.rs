//! IMAP mailbox implementation.
//!
//! # Protocol Details
//!
//! - Uses IMAP4rev1 (RFC 3501) via `async-imap` over implicit TLS
//! - Bodies are fetched with `BODY.PEEK[]` so triage never sets `\Seen`
//! - Markers are IMAP keywords stored with `UID STORE +FLAGS.SILENT`

use std::sync::Arc;
use std::time::Duration;

use async_imap::types::Fetch;
use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use super::traits::{uid_set, Mailbox, ProviderError, Result};
use crate::config::ImapSettings;
use crate::domain::MessageUid;

/// Upper bound on TCP connect plus TLS handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Type alias for the IMAP session with TLS (using tokio-util compat layer).
type ImapSession = async_imap::Session<Compat<TlsStream<TcpStream>>>;

/// Whether a STORE adds or removes flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagOp {
    Add,
    Remove,
}

/// A logged-in IMAP session with one mailbox selected.
pub struct ImapMailbox {
    server: String,
    mailbox: String,
    session: ImapSession,
}

impl ImapMailbox {
    /// Connects, logs in, and selects the configured mailbox.
    pub async fn connect(settings: &ImapSettings, password: &str) -> Result<Self> {
        let tls_stream = tokio::time::timeout(
            CONNECT_TIMEOUT,
            connect_tls(&settings.server, settings.port),
        )
        .await
        .map_err(|_| {
            ProviderError::Connection(format!(
                "connect to {}:{} timed out",
                settings.server, settings.port
            ))
        })??;

        let client = async_imap::Client::new(tls_stream);

        let mut session = client
            .login(&settings.username, password)
            .await
            .map_err(|e| ProviderError::Authentication(format!("IMAP login failed: {}", e.0)))?;

        session
            .select(&settings.mailbox)
            .await
            .map_err(|e| ProviderError::Protocol(format!("SELECT failed: {}", e)))?;

        tracing::debug!(
            server = %settings.server,
            mailbox = %settings.mailbox,
            "IMAP session opened"
        );

        Ok(Self {
            server: settings.server.clone(),
            mailbox: settings.mailbox.clone(),
            session,
        })
    }

    /// Consumes a stream to completion.
    async fn drain_stream<T, E>(
        stream: impl futures::Stream<Item = std::result::Result<T, E>>,
    ) -> std::result::Result<(), E> {
        use futures::StreamExt;
        futures::pin_mut!(stream);
        while let Some(result) = stream.next().await {
            result?;
        }
        Ok(())
    }

    async fn store(&mut self, uids: &[MessageUid], flags: &[&str], op: FlagOp) -> Result<()> {
        if uids.is_empty() || flags.is_empty() {
            return Ok(());
        }

        let store_stream = self
            .session
            .uid_store(uid_set(uids), store_query(op, flags))
            .await
            .map_err(|e| ProviderError::Protocol(format!("STORE failed: {}", e)))?;
        Self::drain_stream(store_stream)
            .await
            .map_err(|e| ProviderError::Protocol(format!("STORE stream: {}", e)))
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn search(&mut self, criteria: &str) -> Result<Vec<MessageUid>> {
        let uids = self
            .session
            .uid_search(criteria)
            .await
            .map_err(|e| ProviderError::Protocol(format!("SEARCH failed: {}", e)))?;

        Ok(uids.into_iter().map(MessageUid).collect())
    }

    async fn fetch(&mut self, uid: MessageUid) -> Result<Option<Vec<u8>>> {
        let fetches: Vec<Fetch> = {
            let stream = self
                .session
                .uid_fetch(uid.to_string(), "(UID BODY.PEEK[])")
                .await
                .map_err(|e| ProviderError::Protocol(format!("FETCH failed: {}", e)))?;
            stream
                .try_collect()
                .await
                .map_err(|e| ProviderError::Protocol(format!("FETCH stream: {}", e)))?
        };

        Ok(fetches
            .iter()
            .find(|f| f.uid == Some(uid.0))
            .and_then(|f| f.body())
            .map(|body| body.to_vec()))
    }

    async fn add_flags(&mut self, uids: &[MessageUid], flags: &[&str]) -> Result<()> {
        self.store(uids, flags, FlagOp::Add).await
    }

    async fn remove_flags(&mut self, uids: &[MessageUid], flags: &[&str]) -> Result<()> {
        self.store(uids, flags, FlagOp::Remove).await
    }

    async fn logout(&mut self) -> Result<()> {
        self.session
            .logout()
            .await
            .map_err(|e| ProviderError::Connection(format!("LOGOUT failed: {}", e)))?;
        tracing::debug!(server = %self.server, mailbox = %self.mailbox, "IMAP session closed");
        Ok(())
    }
}

/// Establishes TLS connection to the IMAP server with futures compat wrapper.
async fn connect_tls(host: &str, port: u16) -> Result<Compat<TlsStream<TcpStream>>> {
    let tcp_stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| ProviderError::Connection(format!("TCP connect failed: {}", e)))?;

    let config = ClientConfig::builder()
        .with_root_certificates(tokio_rustls::rustls::RootCertStore::from_iter(
            webpki_roots::TLS_SERVER_ROOTS.iter().cloned(),
        ))
        .with_no_client_auth();

    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| ProviderError::Connection(format!("invalid server name: {}", e)))?;

    let tls_stream = connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|e| ProviderError::Connection(format!("TLS handshake failed: {}", e)))?;

    // Wrap with tokio-util compat layer for futures async read/write traits
    Ok(tls_stream.compat())
}

fn store_query(op: FlagOp, flags: &[&str]) -> String {
    let sign = match op {
        FlagOp::Add => '+',
        FlagOp::Remove => '-',
    };
    format!("{}FLAGS.SILENT ({})", sign, flags.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_query_add() {
        assert_eq!(
            store_query(FlagOp::Add, &["AIProcessed"]),
            "+FLAGS.SILENT (AIProcessed)"
        );
    }

    #[test]
    fn store_query_remove_many() {
        assert_eq!(
            store_query(FlagOp::Remove, &["AIProcessed", "AIProcessingFailed"]),
            "-FLAGS.SILENT (AIProcessed AIProcessingFailed)"
        );
    }
}
