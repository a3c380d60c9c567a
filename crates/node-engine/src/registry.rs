//! Node service registry and batch execution
//!
//! Maps each [`NodeType`] to the [`NodeService`] that runs it. Services are
//! instantiated lazily on first use and shared afterwards.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use node_engine::{NodeServiceRegistry, NullUpdateSink, ServiceDeps};
//!
//! let registry = NodeServiceRegistry::with_builtins(Arc::new(deps));
//! let report = registry
//!     .execute_nodes_in_order(&graph.nodes, &graph.connections, Arc::new(NullUpdateSink), None)
//!     .await;
//! println!("{} succeeded, {} failed", report.success, report.failed);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::context::{ExecutionContext, NodeUpdateSink};
use crate::deps::ServiceDeps;
use crate::error::{NodeEngineError, Result};
use crate::events::{EventSink, ExecutionEvent, NullEventSink};
use crate::generation_state::GenerationKey;
use crate::schedule::topological_order;
use crate::service::{NodeExecutionResult, NodeService};
use crate::types::{Connection, Node, NodeId, NodeStatus, NodeType, WorkflowGraph};

/// Link-time registration of a node service.
///
/// The `create` field is a function pointer that builds the service from
/// the shared dependencies the first time it is needed.
///
/// # Example
///
/// ```ignore
/// inventory::submit!(node_engine::ServiceRegistration {
///     node_type: NodeType::ImageGenerator,
///     create: |deps| Arc::new(ImageGeneratorService::new(deps.clone())),
/// });
/// ```
pub struct ServiceRegistration {
    pub node_type: NodeType,
    pub create: fn(&Arc<ServiceDeps>) -> Arc<dyn NodeService>,
}

inventory::collect!(ServiceRegistration);

/// Progress callback: `(current, total, node_title)`, `current` is 1-based
pub type ProgressCallback<'a> = &'a (dyn Fn(usize, usize, &str) + Send + Sync);

type ServiceFactory = Box<dyn Fn() -> Arc<dyn NodeService> + Send + Sync>;

struct ServiceSlot {
    factory: ServiceFactory,
    instance: OnceCell<Arc<dyn NodeService>>,
}

/// Aggregate outcome of a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchExecutionReport {
    pub execution_id: String,
    pub success: usize,
    pub failed: usize,
    /// Per-node results for every node that ran
    pub results: HashMap<NodeId, NodeExecutionResult>,
    /// Nodes that ran, in execution order
    pub order: Vec<NodeId>,
    /// Nodes excluded because they sit on or behind a cycle
    pub skipped: Vec<NodeId>,
}

impl BatchExecutionReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.skipped.is_empty()
    }
}

pub struct NodeServiceRegistry {
    services: RwLock<HashMap<NodeType, Arc<ServiceSlot>>>,
    deps: Option<Arc<ServiceDeps>>,
    event_sink: Arc<dyn EventSink>,
}

impl NodeServiceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            deps: None,
            event_sink: Arc::new(NullEventSink),
        }
    }

    /// Create a registry holding every service submitted via `inventory`
    pub fn with_builtins(deps: Arc<ServiceDeps>) -> Self {
        let mut registry = Self::new();
        for registration in inventory::iter::<ServiceRegistration> {
            let create = registration.create;
            let service_deps = deps.clone();
            registry.register(registration.node_type, move || create(&service_deps));
        }
        registry.deps = Some(deps);
        log::debug!("Registered {} built-in node services", registry.len());
        registry
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Register a lazily-built service, replacing any previous one
    pub fn register<F>(&mut self, node_type: NodeType, factory: F)
    where
        F: Fn() -> Arc<dyn NodeService> + Send + Sync + 'static,
    {
        self.services.write().insert(
            node_type,
            Arc::new(ServiceSlot {
                factory: Box::new(factory),
                instance: OnceCell::new(),
            }),
        );
    }

    /// Register an already-built service
    pub fn register_service(&mut self, service: Arc<dyn NodeService>) {
        let node_type = service.node_type();
        let instance = OnceCell::new();
        let _ = instance.set(service.clone());
        self.services.write().insert(
            node_type,
            Arc::new(ServiceSlot {
                factory: Box::new(move || service.clone()),
                instance,
            }),
        );
    }

    /// The service for a node type, built on first request
    pub fn get(&self, node_type: NodeType) -> Option<Arc<dyn NodeService>> {
        let slot = self.services.read().get(&node_type).cloned()?;
        Some(slot.instance.get_or_init(|| (slot.factory)()).clone())
    }

    pub fn has_service(&self, node_type: NodeType) -> bool {
        self.services.read().contains_key(&node_type)
    }

    pub fn node_types(&self) -> Vec<NodeType> {
        let services = self.services.read();
        NodeType::ALL
            .into_iter()
            .filter(|t| services.contains_key(t))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run a single node against a graph snapshot
    pub async fn execute_node(
        &self,
        node_id: &str,
        nodes: &[Node],
        connections: &[Connection],
        updates: Arc<dyn NodeUpdateSink>,
    ) -> NodeExecutionResult {
        let ctx = ExecutionContext::new(nodes.to_vec(), connections.to_vec(), updates);
        self.run_in_context(node_id, &ctx).await
    }

    async fn run_in_context(&self, node_id: &str, ctx: &ExecutionContext) -> NodeExecutionResult {
        let Some(node) = ctx.node(node_id) else {
            return NodeExecutionResult::failure(NodeEngineError::NodeNotFound(node_id.to_string()).to_string());
        };

        match self.get(node.node_type()) {
            Some(service) => service.execute_node(&node, ctx).await,
            None => {
                let message = NodeEngineError::UnknownNodeType(node.node_type()).to_string();
                log::error!("{}", message);
                ctx.update_node_status(&node.id, NodeStatus::Error, Some(&message));
                NodeExecutionResult::failure(message)
            }
        }
    }

    /// Run every node in dependency order, one at a time.
    ///
    /// A failed node does not stop the batch; its dependents run next and
    /// typically fail validation for lack of input. Nodes on or behind a
    /// cycle are reported in `skipped` and never run.
    pub async fn execute_nodes_in_order(
        &self,
        nodes: &[Node],
        connections: &[Connection],
        updates: Arc<dyn NodeUpdateSink>,
        on_progress: Option<ProgressCallback<'_>>,
    ) -> BatchExecutionReport {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let schedule = topological_order(nodes, connections);
        let total = schedule.order.len();
        let ctx = ExecutionContext::new(nodes.to_vec(), connections.to_vec(), updates);

        log::info!(
            "Batch {} started: {} nodes, {} skipped",
            execution_id,
            total,
            schedule.excluded.len()
        );
        self.emit(ExecutionEvent::BatchStarted {
            execution_id: execution_id.clone(),
            total,
            skipped: schedule.excluded.clone(),
        });

        let mut report = BatchExecutionReport {
            execution_id: execution_id.clone(),
            success: 0,
            failed: 0,
            results: HashMap::with_capacity(total),
            order: schedule.order.clone(),
            skipped: schedule.excluded,
        };

        for (index, node_id) in schedule.order.iter().enumerate() {
            let (title, node_type) = match ctx.node(node_id) {
                Some(node) => (node.title.clone(), node.node_type()),
                None => continue,
            };
            self.emit(ExecutionEvent::NodeStarted {
                execution_id: execution_id.clone(),
                node_id: node_id.clone(),
                node_type,
            });

            let result = self.run_in_context(node_id, &ctx).await;

            if result.success {
                report.success += 1;
                self.emit(ExecutionEvent::NodeCompleted {
                    execution_id: execution_id.clone(),
                    node_id: node_id.clone(),
                    from_cache: result.from_cache,
                });
            } else {
                report.failed += 1;
                self.emit(ExecutionEvent::NodeFailed {
                    execution_id: execution_id.clone(),
                    node_id: node_id.clone(),
                    error: result.error.clone().unwrap_or_default(),
                });
            }
            report.results.insert(node_id.clone(), result);

            if let Some(callback) = on_progress {
                callback(index + 1, total, &title);
            }
            self.emit(ExecutionEvent::Progress {
                execution_id: execution_id.clone(),
                current: index + 1,
                total,
                node_title: title,
            });
        }

        log::info!(
            "Batch {} finished: {} succeeded, {} failed",
            execution_id,
            report.success,
            report.failed
        );
        self.emit(ExecutionEvent::BatchCompleted {
            execution_id,
            success: report.success,
            failed: report.failed,
        });
        report
    }

    /// Remove a node from the graph together with its connections, cached
    /// artifact index entries and multi-stage generation state.
    ///
    /// Stored artifact bytes are kept; use
    /// [`ArtifactCache::purge`](crate::ArtifactCache::purge) to delete them.
    pub async fn delete_node(&self, graph: &mut WorkflowGraph, node_id: &str) -> Result<Node> {
        let node = graph
            .remove_node(node_id)
            .ok_or_else(|| NodeEngineError::NodeNotFound(node_id.to_string()))?;

        if let Some(deps) = &self.deps {
            deps.cache.invalidate(node_id).await?;
            deps.generation_state.remove_node(node_id);
            deps.queue.remove_owners_with_prefix(&GenerationKey::node_prefix(node_id));
        }
        log::debug!("Deleted node '{}'", node_id);
        Ok(node)
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Err(e) = self.event_sink.send(event) {
            log::warn!("Failed to send execution event: {}", e);
        }
    }
}

impl Default for NodeServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
