//! External interfaces a compiled graph is wired against.
//!
//! [`Services`] bundles everything a [`crate::compiler::compile`] call needs
//! to turn a [`crate::graph_def::NodeDef`] into a runnable
//! [`crate::plan::NodeWrapper`]: an LLM client factory, a tool registry, an
//! HTTP client, an optional checkpointer, and an expression evaluator. The
//! [`ExecutorRegistry`] is the seam the compiler resolves `NodeKind` against;
//! built-in kinds are registered by [`ExecutorRegistry::with_builtins`], and
//! a host application can register additional kinds (or override a built-in)
//! before compiling.

use crate::error::Result;
use crate::expr::ExpressionEvaluator;
use crate::graph_def::{NodeDef, NodeKind};
use crate::llm::ChatModel;
use crate::plan::NodeExecutor;
use crate::tool::ToolRegistry;
use graphflow_checkpoint::CheckpointSaver;
use std::collections::HashMap;
use std::sync::Arc;

/// Produces the model client a node's executor should call. Boxed rather
/// than a bare `Arc<dyn ChatModel>` because different nodes in the same
/// graph may name different model handles (`config["model"]`) that resolve
/// to different clients.
pub trait LlmClientFactory: Send + Sync {
    /// Resolve a model handle (e.g. `"gpt-4o"`, `"claude-sonnet"`) to a client.
    /// Errors if the handle is unknown to this factory.
    fn resolve(&self, model_handle: &str) -> Result<Arc<dyn ChatModel>>;
}

/// An [`LlmClientFactory`] backed by a static handle -> client map, for
/// hosts that register all their model clients up front.
#[derive(Clone, Default)]
pub struct StaticLlmClientFactory {
    clients: HashMap<String, Arc<dyn ChatModel>>,
}

impl StaticLlmClientFactory {
    pub fn new() -> Self {
        Self { clients: HashMap::new() }
    }

    pub fn with_client(mut self, handle: impl Into<String>, client: Arc<dyn ChatModel>) -> Self {
        self.clients.insert(handle.into(), client);
        self
    }
}

impl LlmClientFactory for StaticLlmClientFactory {
    fn resolve(&self, model_handle: &str) -> Result<Arc<dyn ChatModel>> {
        self.clients.get(model_handle).cloned().ok_or_else(|| {
            crate::error::GraphError::Configuration(format!(
                "no LLM client registered for model handle '{model_handle}'"
            ))
        })
    }
}

/// Builds the concrete [`NodeExecutor`] for one node, given its declaration
/// and the services available to it. Implemented once per [`NodeKind`] and
/// registered with an [`ExecutorRegistry`].
pub trait ExecutorFactory: Send + Sync {
    fn build(&self, node: &NodeDef, services: &Services) -> Result<Arc<dyn NodeExecutor>>;
}

impl<F> ExecutorFactory for F
where
    F: Fn(&NodeDef, &Services) -> Result<Arc<dyn NodeExecutor>> + Send + Sync,
{
    fn build(&self, node: &NodeDef, services: &Services) -> Result<Arc<dyn NodeExecutor>> {
        (self)(node, services)
    }
}

/// `registerExecutor`/`resolveExecutor`: maps a [`NodeKind`] to the factory
/// that knows how to build a runnable executor for nodes of that kind.
///
/// Built-in kinds are seeded by [`ExecutorRegistry::with_builtins`]; a host
/// can call [`ExecutorRegistry::register`] afterwards to add a kind the
/// built-ins don't cover, or to replace a built-in with a custom one. The
/// last registration for a given kind wins.
#[derive(Default)]
pub struct ExecutorRegistry {
    factories: HashMap<NodeKind, Arc<dyn ExecutorFactory>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self { factories: HashMap::new() }
    }

    /// Seed the registry with graphflow's built-in executors for every
    /// [`NodeKind`]. Constructed lazily at call time to avoid a dependency
    /// cycle between this module and `executors`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::executors::register_builtins(&mut registry);
        registry
    }

    pub fn register(&mut self, kind: NodeKind, factory: Arc<dyn ExecutorFactory>) {
        self.factories.insert(kind, factory);
    }

    pub fn resolve_executor(
        &self,
        node: &NodeDef,
        services: &Services,
    ) -> Result<Arc<dyn NodeExecutor>> {
        let factory = self.factories.get(&node.kind).ok_or_else(|| {
            crate::error::GraphError::Configuration(format!(
                "no executor registered for node kind {:?} (node '{}')",
                node.kind, node.id
            ))
        })?;
        factory.build(node, services)
    }

    pub fn has_kind(&self, kind: NodeKind) -> bool {
        self.factories.contains_key(&kind)
    }
}

/// The external interfaces a [`crate::compiler::compile`] call is wired
/// against: model clients, tools, outbound HTTP, persistence, and the
/// restricted expression evaluator condition/router/function nodes share.
#[derive(Clone)]
pub struct Services {
    pub llm_client_factory: Arc<dyn LlmClientFactory>,
    pub tool_registry: Arc<ToolRegistry>,
    pub http_client: reqwest::Client,
    pub checkpointer: Option<Arc<dyn CheckpointSaver>>,
    pub expression_evaluator: Arc<dyn ExpressionEvaluator>,
}

impl Services {
    pub fn builder() -> ServicesBuilder {
        ServicesBuilder::default()
    }
}

/// Builder for [`Services`]; defaults to an empty tool registry, a fresh
/// `reqwest::Client`, no checkpointer, and the default expression evaluator.
#[derive(Default)]
pub struct ServicesBuilder {
    llm_client_factory: Option<Arc<dyn LlmClientFactory>>,
    tool_registry: Option<Arc<ToolRegistry>>,
    http_client: Option<reqwest::Client>,
    checkpointer: Option<Arc<dyn CheckpointSaver>>,
    expression_evaluator: Option<Arc<dyn ExpressionEvaluator>>,
}

impl ServicesBuilder {
    pub fn with_llm_client_factory(mut self, factory: Arc<dyn LlmClientFactory>) -> Self {
        self.llm_client_factory = Some(factory);
        self
    }

    pub fn with_tool_registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.tool_registry = Some(registry);
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn with_expression_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.expression_evaluator = Some(evaluator);
        self
    }

    pub fn build(self) -> Services {
        Services {
            llm_client_factory: self
                .llm_client_factory
                .unwrap_or_else(|| Arc::new(StaticLlmClientFactory::new())),
            tool_registry: self.tool_registry.unwrap_or_else(|| Arc::new(ToolRegistry::new())),
            http_client: self.http_client.unwrap_or_default(),
            checkpointer: self.checkpointer,
            expression_evaluator: self
                .expression_evaluator
                .unwrap_or_else(|| Arc::new(crate::expr::DefaultExpressionEvaluator::new())),
        }
    }
}
