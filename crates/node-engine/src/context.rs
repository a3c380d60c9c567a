//! Execution context handed to node services
//!
//! The context owns a snapshot of the graph for the duration of a run.
//! Node services read upstream data through it and write their own data
//! and status back through it; every write is mirrored to the host's
//! [`NodeUpdateSink`] so the canvas can re-render.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::data::{NodeData, NodeVariant, Shot};
use crate::error::{NodeEngineError, Result};
use crate::types::{Connection, Node, NodeId, NodeStatus};

/// Receives node mutations made during execution
pub trait NodeUpdateSink: Send + Sync {
    fn on_status(&self, node_id: &str, status: NodeStatus, error: Option<&str>);
    fn on_data(&self, node_id: &str, data: &NodeData);
}

/// Sink that discards updates
pub struct NullUpdateSink;

impl NodeUpdateSink for NullUpdateSink {
    fn on_status(&self, _node_id: &str, _status: NodeStatus, _error: Option<&str>) {}
    fn on_data(&self, _node_id: &str, _data: &NodeData) {}
}

/// A recorded node mutation
#[derive(Debug, Clone, PartialEq)]
pub enum NodeUpdate {
    Status {
        node_id: NodeId,
        status: NodeStatus,
        error: Option<String>,
    },
    Data {
        node_id: NodeId,
        data: NodeData,
    },
}

/// Sink that records every update (useful for testing)
#[derive(Default)]
pub struct RecordingUpdateSink {
    updates: Mutex<Vec<NodeUpdate>>,
}

impl RecordingUpdateSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<NodeUpdate> {
        self.updates.lock().clone()
    }

    /// Status transitions recorded for one node, in order
    pub fn statuses(&self, node_id: &str) -> Vec<NodeStatus> {
        self.updates
            .lock()
            .iter()
            .filter_map(|u| match u {
                NodeUpdate::Status { node_id: id, status, .. } if id == node_id => Some(*status),
                _ => None,
            })
            .collect()
    }

    /// Most recent data written for a node
    pub fn latest_data(&self, node_id: &str) -> Option<NodeData> {
        self.updates.lock().iter().rev().find_map(|u| match u {
            NodeUpdate::Data { node_id: id, data } if id == node_id => Some(data.clone()),
            _ => None,
        })
    }
}

impl NodeUpdateSink for RecordingUpdateSink {
    fn on_status(&self, node_id: &str, status: NodeStatus, error: Option<&str>) {
        self.updates.lock().push(NodeUpdate::Status {
            node_id: node_id.to_string(),
            status,
            error: error.map(str::to_string),
        });
    }

    fn on_data(&self, node_id: &str, data: &NodeData) {
        self.updates.lock().push(NodeUpdate::Data {
            node_id: node_id.to_string(),
            data: data.clone(),
        });
    }
}

/// Graph snapshot plus mutation callbacks for one execution
#[derive(Clone)]
pub struct ExecutionContext {
    nodes: Arc<RwLock<Vec<Node>>>,
    connections: Arc<Vec<Connection>>,
    sink: Arc<dyn NodeUpdateSink>,
}

impl ExecutionContext {
    pub fn new(nodes: Vec<Node>, connections: Vec<Connection>, sink: Arc<dyn NodeUpdateSink>) -> Self {
        Self {
            nodes: Arc::new(RwLock::new(nodes)),
            connections: Arc::new(connections),
            sink,
        }
    }

    /// Current state of a node
    pub fn node(&self, node_id: &str) -> Option<Node> {
        self.nodes.read().iter().find(|n| n.id == node_id).cloned()
    }

    /// Current state of every node
    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.read().clone()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Nodes feeding into `node_id`, in connection order
    pub fn upstream_nodes(&self, node_id: &str) -> Vec<Node> {
        let nodes = self.nodes.read();
        self.connections
            .iter()
            .filter(|c| c.to == node_id)
            .filter_map(|c| nodes.iter().find(|n| n.id == c.from).cloned())
            .collect()
    }

    pub fn has_upstream(&self, node_id: &str) -> bool {
        self.connections.iter().any(|c| c.to == node_id)
    }

    /// Data of upstream nodes holding variant `T`
    pub fn get_input_data<T: NodeVariant>(&self, node_id: &str) -> Vec<T> {
        self.upstream_nodes(node_id)
            .iter()
            .filter_map(|n| T::from_data(&n.data).cloned())
            .collect()
    }

    /// Non-empty upstream text outputs joined by blank lines
    pub fn upstream_text(&self, node_id: &str) -> Option<String> {
        let texts: Vec<String> = self
            .upstream_nodes(node_id)
            .iter()
            .filter_map(|n| n.data.text_output().map(str::to_string))
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n\n"))
        }
    }

    pub fn upstream_images(&self, node_id: &str) -> Vec<String> {
        self.upstream_nodes(node_id)
            .iter()
            .flat_map(|n| n.data.image_outputs())
            .collect()
    }

    pub fn upstream_shots(&self, node_id: &str) -> Vec<Shot> {
        self.upstream_nodes(node_id)
            .iter()
            .flat_map(|n| n.data.shot_outputs().to_vec())
            .collect()
    }

    pub fn update_node_status(&self, node_id: &str, status: NodeStatus, error: Option<&str>) {
        {
            let mut nodes = self.nodes.write();
            if let Some(node) = nodes.iter_mut().find(|n| n.id == node_id) {
                node.status = status;
                node.error = error.map(str::to_string);
            }
        }
        self.sink.on_status(node_id, status, error);
    }

    /// Mutate a node's data in place.
    ///
    /// Fails with [`NodeEngineError::NodeTypeMismatch`] when the node holds
    /// another variant. Returns the updated data.
    pub fn update_node_data<T, F>(&self, node_id: &str, update: F) -> Result<T>
    where
        T: NodeVariant,
        F: FnOnce(&mut T),
    {
        let (updated, data) = {
            let mut nodes = self.nodes.write();
            let node = nodes
                .iter_mut()
                .find(|n| n.id == node_id)
                .ok_or_else(|| NodeEngineError::NodeNotFound(node_id.to_string()))?;
            let actual = node.node_type();
            let inner = T::from_data_mut(&mut node.data).ok_or_else(|| NodeEngineError::NodeTypeMismatch {
                node_id: node_id.to_string(),
                expected: T::NODE_TYPE,
                actual,
            })?;
            update(inner);
            (inner.clone(), node.data.clone())
        };
        self.sink.on_data(node_id, &data);
        Ok(updated)
    }

    /// Replace a node's data wholesale; the variant must not change
    pub fn replace_node_data(&self, node_id: &str, data: NodeData) -> Result<()> {
        {
            let mut nodes = self.nodes.write();
            let node = nodes
                .iter_mut()
                .find(|n| n.id == node_id)
                .ok_or_else(|| NodeEngineError::NodeNotFound(node_id.to_string()))?;
            if node.node_type() != data.node_type() {
                return Err(NodeEngineError::NodeTypeMismatch {
                    node_id: node_id.to_string(),
                    expected: node.node_type(),
                    actual: data.node_type(),
                });
            }
            node.data = data.clone();
        }
        self.sink.on_data(node_id, &data);
        Ok(())
    }
}
