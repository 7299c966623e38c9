//! Name-indexed lookup over native tools and the remote tools of an attached
//! [`ClientManager`].

use std::collections::HashMap;
use std::sync::Arc;

use super::tool::Tool;
use crate::mcp::ClientManager;
use crate::types::ToolDefinition;

/// The set of tools an agent can call.
///
/// Native tools shadow remote ones with the same name. Remote tools are read
/// from the manager on every lookup, so connects and disconnects made while
/// an agent is running become visible on its next step.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    native: HashMap<String, Arc<dyn Tool>>,
    remote: Option<Arc<ClientManager>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with [`super::builtin::all_tools`].
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for tool in super::builtin::all_tools() {
            registry.register(tool);
        }
        registry
    }

    /// Add or replace a native tool.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.native.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "replaced existing tool registration");
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Expose the remote tools of `manager`.
    pub fn attach(&mut self, manager: Arc<ClientManager>) {
        self.remote = Some(manager);
    }

    pub fn with_manager(mut self, manager: Arc<ClientManager>) -> Self {
        self.attach(manager);
        self
    }

    pub fn manager(&self) -> Option<&Arc<ClientManager>> {
        self.remote.as_ref()
    }

    pub async fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        if let Some(tool) = self.native.get(name) {
            return Some(Arc::clone(tool));
        }
        let manager = self.remote.as_ref()?;
        manager
            .get_tool(name)
            .await
            .map(|adapter| adapter as Arc<dyn Tool>)
    }

    /// Every visible tool, sorted by name.
    pub async fn tools(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<Arc<dyn Tool>> = self.native.values().cloned().collect();
        if let Some(manager) = &self.remote {
            for adapter in manager.all_tools().await {
                if !self.native.contains_key(adapter.name()) {
                    tools.push(adapter);
                }
            }
        }
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
    }

    /// Function schemas advertised to the model.
    pub async fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools().await.iter().map(|t| t.definition()).collect()
    }

    pub async fn names(&self) -> Vec<String> {
        self.tools()
            .await
            .iter()
            .map(|t| t.name().to_string())
            .collect()
    }

    pub fn native_len(&self) -> usize {
        self.native.len()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut native: Vec<&String> = self.native.keys().collect();
        native.sort();
        f.debug_struct("ToolRegistry")
            .field("native", &native)
            .field("remote", &self.remote.is_some())
            .finish()
    }
}
