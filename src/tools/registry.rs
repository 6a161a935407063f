//! Name-keyed catalog of registered tools.
//!
//! The registry is the single source of truth for which tools exist. It is a
//! cheap-to-clone handle; every clone sees the same catalog.

use super::{Tool, ToolDescriptor};
use crate::error::ToolError;
use crate::script::DynamicToolCompiler;
use crate::types::ToolDefinition;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Registry of available tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<RwLock<BTreeMap<String, Arc<dyn Tool>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. An existing name is never overwritten.
    pub fn register(&self, tool: impl Tool + 'static) -> Result<(), ToolError> {
        self.register_shared(Arc::new(tool))
    }

    /// Register an already shared tool instance.
    pub fn register_shared(&self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.descriptor().name.clone();
        let mut tools = self.write();
        if tools.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }
        debug!(tool = %name, "registered tool");
        tools.insert(name, tool);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Remove a tool. Calls already holding the instance are unaffected.
    pub fn unregister(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.write()
            .remove(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// Descriptors of every tool matching `predicate`, in name order.
    pub fn list_by_capability<P>(&self, predicate: P) -> Vec<ToolDescriptor>
    where
        P: Fn(&ToolDescriptor) -> bool,
    {
        self.read()
            .values()
            .map(|tool| tool.descriptor())
            .filter(|descriptor| predicate(descriptor))
            .cloned()
            .collect()
    }

    /// Every declared dependency must resolve to a registered tool.
    pub fn check_dependencies(&self, descriptor: &ToolDescriptor) -> Result<(), ToolError> {
        let tools = self.read();
        match descriptor
            .dependencies
            .iter()
            .find(|dependency| !tools.contains_key(dependency.as_str()))
        {
            Some(missing) => Err(ToolError::MissingDependency {
                tool: descriptor.name.clone(),
                dependency: missing.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Compile `source` and register the result under `name`.
    ///
    /// Nothing is registered when compilation fails.
    pub fn create_dynamic_tool(
        &self,
        compiler: &DynamicToolCompiler,
        name: &str,
        source: &str,
    ) -> Result<ToolDescriptor, ToolError> {
        if self.contains(name) {
            return Err(ToolError::Duplicate(name.to_string()));
        }
        let tool = compiler.compile_tool(name, source)?;
        let descriptor = tool.descriptor().clone();
        self.register_shared(tool)?;
        info!(tool = %name, "registered dynamic tool");
        Ok(descriptor)
    }

    /// Tool declarations for the completion request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.read()
            .values()
            .map(|tool| tool.descriptor().definition())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<dyn Tool>>> {
        self.tools.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<dyn Tool>>> {
        self.tools.write().unwrap_or_else(PoisonError::into_inner)
    }
}
