//! Owns connected sessions and the catalog of namespaced remote tools.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::adapter::McpToolAdapter;
use super::session::{DefaultSessionFactory, Session, SessionFactory, SessionOptions};
use super::{DeclaredServer, TransportConfig};
use crate::error::AgentError;
use crate::util::timeout::{cancellable, with_timeout};

/// Longest local tool name accepted by model function-calling APIs.
pub const MAX_TOOL_NAME_LEN: usize = 64;

#[derive(Default)]
struct ManagerState {
    sessions: HashMap<String, Arc<dyn Session>>,
    tools: BTreeMap<String, Arc<McpToolAdapter>>,
}

/// Session registry and remote tool catalog.
///
/// Mutations take the write lock only to swap map entries; channel setup,
/// discovery and shutdown run outside it so readers are never blocked on
/// network or process I/O.
pub struct ClientManager {
    state: RwLock<ManagerState>,
    factory: Arc<dyn SessionFactory>,
    options: SessionOptions,
}

impl Default for ClientManager {
    fn default() -> Self {
        Self::new(SessionOptions::default())
    }
}

impl ClientManager {
    pub fn new(options: SessionOptions) -> Self {
        Self::with_factory(Arc::new(DefaultSessionFactory), options)
    }

    /// Use a custom session factory (alternate transports, tests).
    pub fn with_factory(factory: Arc<dyn SessionFactory>, options: SessionOptions) -> Self {
        Self {
            state: RwLock::new(ManagerState::default()),
            factory,
            options,
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Connect `server_id`, replacing any existing session for it.
    ///
    /// Returns the local names registered for the server's tools.
    pub async fn connect(
        &self,
        server_id: &str,
        transport: &TransportConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, AgentError> {
        let session = self.factory.open(server_id, transport, &self.options)?;
        self.connect_session(session, cancel).await
    }

    /// Initialize an already-built session, discover its tools and register
    /// it. On any failure the session is closed and nothing is registered.
    pub async fn connect_session(
        &self,
        session: Arc<dyn Session>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, AgentError> {
        let server_id = session.server_id().to_string();
        validate_server_id(&server_id)?;

        self.disconnect(&server_id).await?;

        let deadline = self.options.connect_timeout;
        let established = cancellable(cancel, async {
            session.initialize(deadline).await?;
            with_timeout(deadline, session.list_tools(cancel)).await
        })
        .await;

        let descriptors = match established {
            Ok(descriptors) => descriptors,
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    tracing::warn!(server = %server_id, error = %close_err, "rollback close failed");
                }
                return Err(e);
            }
        };

        let (names, displaced) = {
            let mut state = self.state.write().await;
            // A concurrent connect for the same id may have landed meanwhile.
            let displaced = detach(&mut state, &server_id);
            let mut names = Vec::with_capacity(descriptors.len());
            for descriptor in descriptors {
                let local = unique_tool_name(&state.tools, &server_id, &descriptor.name);
                let adapter = McpToolAdapter::new(local.clone(), descriptor, Arc::clone(&session));
                tracing::debug!(server = %server_id, tool = %local, "registered remote tool");
                state.tools.insert(local.clone(), Arc::new(adapter));
                names.push(local);
            }
            state.sessions.insert(server_id.clone(), Arc::clone(&session));
            (names, displaced)
        };

        if let Some(old) = displaced {
            if let Err(e) = old.close().await {
                tracing::warn!(server = %server_id, error = %e, "failed to close displaced session");
            }
        }

        tracing::info!(server = %server_id, tool_count = names.len(), "connected MCP server");
        Ok(names)
    }

    /// Remove a server's adapters and close its session. Unknown ids are a
    /// no-op.
    pub async fn disconnect(&self, server_id: &str) -> Result<(), AgentError> {
        let session = {
            let mut state = self.state.write().await;
            detach(&mut state, server_id)
        };
        let Some(session) = session else {
            return Ok(());
        };
        let closed = session.close().await;
        tracing::info!(server = %server_id, "disconnected MCP server");
        closed
    }

    /// Connect every declared server, skipping (and logging) failures.
    ///
    /// Cancellation is checked before and between servers. Returns the ids
    /// that connected.
    pub async fn initialize_from_declared(
        &self,
        servers: &[DeclaredServer],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, AgentError> {
        tracing::info!(server_count = servers.len(), "connecting declared MCP servers");
        let mut connected = Vec::new();
        for server in servers {
            if cancel.is_cancelled() {
                tracing::info!("server initialization cancelled");
                return Err(AgentError::Cancelled);
            }
            match self.connect(&server.id, &server.transport, cancel).await {
                Ok(_) => connected.push(server.id.clone()),
                Err(AgentError::Cancelled) => {
                    tracing::info!(server = %server.id, "server initialization cancelled");
                    return Err(AgentError::Cancelled);
                }
                Err(e) => {
                    tracing::warn!(
                        server = %server.id,
                        transport = server.transport.kind(),
                        error = %e,
                        "failed to connect MCP server; skipping"
                    );
                }
            }
        }
        Ok(connected)
    }

    /// [`initialize_from_declared`](Self::initialize_from_declared), closing
    /// whatever did connect when it fails.
    pub async fn initialize_or_close(
        &self,
        servers: &[DeclaredServer],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, AgentError> {
        match self.initialize_from_declared(servers, cancel).await {
            Ok(connected) => Ok(connected),
            Err(e) => {
                if let Err(close_err) = self.close().await {
                    tracing::warn!(error = %close_err, "failed to close sessions after aborted initialization");
                }
                Err(e)
            }
        }
    }

    /// Disconnect everything, reporting every failure.
    pub async fn close(&self) -> Result<(), AgentError> {
        let ids = self.server_ids().await;
        let mut failures = Vec::new();
        for id in ids {
            if let Err(e) = self.disconnect(&id).await {
                failures.push(format!("{id}: {e}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(AgentError::Transport(format!(
                "failed to close {} session(s): {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }

    /// Snapshot of every registered adapter, ordered by local name.
    pub async fn all_tools(&self) -> Vec<Arc<McpToolAdapter>> {
        self.state.read().await.tools.values().cloned().collect()
    }

    pub async fn get_tool(&self, name: &str) -> Option<Arc<McpToolAdapter>> {
        self.state.read().await.tools.get(name).cloned()
    }

    /// Connected server ids, sorted.
    pub async fn server_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().await.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn session(&self, server_id: &str) -> Option<Arc<dyn Session>> {
        self.state.read().await.sessions.get(server_id).cloned()
    }
}

fn detach(state: &mut ManagerState, server_id: &str) -> Option<Arc<dyn Session>> {
    state.tools.retain(|_, adapter| adapter.server_id() != server_id);
    state.sessions.remove(server_id)
}

fn validate_server_id(server_id: &str) -> Result<(), AgentError> {
    if server_id.trim().is_empty() {
        return Err(AgentError::InvalidArgument("server id must not be empty".into()));
    }
    Ok(())
}

/// Build `mcp_<server>_<tool>`, restricted to `[A-Za-z0-9_-]`, cut to
/// [`MAX_TOOL_NAME_LEN`], and suffixed `_2`, `_3`, ... until unused.
pub fn unique_tool_name<V>(taken: &BTreeMap<String, V>, server_id: &str, tool: &str) -> String {
    let base: String = format!("mcp_{server_id}_{tool}")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    let candidate = clip(&base, MAX_TOOL_NAME_LEN);
    if !taken.contains_key(&candidate) {
        return candidate;
    }
    let mut n = 2usize;
    loop {
        let suffix = format!("_{n}");
        let candidate = format!("{}{suffix}", clip(&base, MAX_TOOL_NAME_LEN - suffix.len()));
        if !taken.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn clip(s: &str, max: usize) -> String {
    // Only ASCII survives sanitizing, so bytes and chars coincide.
    s[..s.len().min(max)].to_string()
}
