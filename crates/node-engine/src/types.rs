//! Core types for workflow graphs
//!
//! These types define the structure of a canvas graph: typed nodes and
//! the directed connections between them.

use std::collections::{HashSet, VecDeque};

use model_router::ModelCategory;
use serde::{Deserialize, Serialize};

use crate::data::NodeData;
use crate::error::{NodeEngineError, Result};

/// Unique identifier for a node
pub type NodeId = String;

/// The fixed set of node types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    /// User-entered prompt text
    PromptInput,
    /// Text model that turns an idea into a script and shot list
    ScriptPlanner,
    /// Text-to-image with optional reference images
    ImageGenerator,
    /// Submit-then-poll video generation
    VideoGenerator,
    /// Speech or music generation
    AudioGenerator,
    /// Multi-entity character designer (profile, expression sheet, three-view)
    Character,
    /// Phased generator turning storyboard shots into clips
    StoryboardVideoGenerator,
}

impl NodeType {
    pub const ALL: [NodeType; 7] = [
        NodeType::PromptInput,
        NodeType::ScriptPlanner,
        NodeType::ImageGenerator,
        NodeType::VideoGenerator,
        NodeType::AudioGenerator,
        NodeType::Character,
        NodeType::StoryboardVideoGenerator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PromptInput => "PROMPT_INPUT",
            Self::ScriptPlanner => "SCRIPT_PLANNER",
            Self::ImageGenerator => "IMAGE_GENERATOR",
            Self::VideoGenerator => "VIDEO_GENERATOR",
            Self::AudioGenerator => "AUDIO_GENERATOR",
            Self::Character => "CHARACTER",
            Self::StoryboardVideoGenerator => "STORYBOARD_VIDEO_GENERATOR",
        }
    }

    /// Model category the node generates with, if any
    pub fn model_category(&self) -> Option<ModelCategory> {
        match self {
            Self::PromptInput => None,
            Self::ScriptPlanner => Some(ModelCategory::Text),
            Self::ImageGenerator | Self::Character => Some(ModelCategory::Image),
            Self::VideoGenerator | Self::StoryboardVideoGenerator => Some(ModelCategory::Video),
            Self::AudioGenerator => Some(ModelCategory::Audio),
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution status of a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Idle,
    Running,
    Success,
    Error,
}

/// A node instance in a graph.
///
/// The node type is the tag of `data`, so it cannot change independently
/// of the data; [`crate::ExecutionContext`] rejects data of another type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    /// Display title, used in progress reporting
    pub title: String,
    pub data: NodeData,
    #[serde(default)]
    pub status: NodeStatus,
    /// Last error message when `status == Error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Position in the UI (x, y); irrelevant to execution
    #[serde(default)]
    pub position: (f64, f64),
}

impl Node {
    pub fn new(id: impl Into<String>, title: impl Into<String>, data: NodeData) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            data,
            status: NodeStatus::Idle,
            error: None,
            position: (0.0, 0.0),
        }
    }

    pub fn node_type(&self) -> NodeType {
        self.data.node_type()
    }
}

/// Directed edge: output of `from` feeds input of `to`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub from: NodeId,
    pub to: NodeId,
}

impl Connection {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// A complete canvas graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a node by ID
    pub fn find_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Find a node by ID (mutable)
    pub fn find_node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Add a node; ids must be unique
    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if self.find_node(&node.id).is_some() {
            return Err(NodeEngineError::DuplicateNode(node.id));
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Get the IDs of nodes that this node depends on (upstream nodes)
    pub fn get_dependencies(&self, node_id: &str) -> Vec<NodeId> {
        self.connections
            .iter()
            .filter(|c| c.to == node_id)
            .map(|c| c.from.clone())
            .collect()
    }

    /// Get the IDs of nodes that depend on this node (downstream nodes)
    pub fn get_dependents(&self, node_id: &str) -> Vec<NodeId> {
        self.connections
            .iter()
            .filter(|c| c.from == node_id)
            .map(|c| c.to.clone())
            .collect()
    }

    /// Insert a connection after checking it keeps the graph a simple DAG
    pub fn add_connection(&mut self, from: &str, to: &str) -> Result<()> {
        let reject = |reason: &str| NodeEngineError::InvalidConnection {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.to_string(),
        };

        if from == to {
            return Err(reject("self-loop"));
        }
        if self.find_node(from).is_none() || self.find_node(to).is_none() {
            return Err(reject("unknown node"));
        }
        if self.connections.iter().any(|c| c.from == from && c.to == to) {
            return Err(reject("duplicate connection"));
        }
        if self.is_reachable(to, from) {
            return Err(reject("would create a cycle"));
        }

        self.connections.push(Connection::new(from, to));
        Ok(())
    }

    /// Remove a connection, returning whether it existed
    pub fn remove_connection(&mut self, from: &str, to: &str) -> bool {
        let before = self.connections.len();
        self.connections.retain(|c| !(c.from == from && c.to == to));
        self.connections.len() != before
    }

    /// Remove a node and every connection touching it
    pub fn remove_node(&mut self, node_id: &str) -> Option<Node> {
        let pos = self.nodes.iter().position(|n| n.id == node_id)?;
        self.connections.retain(|c| c.from != node_id && c.to != node_id);
        Some(self.nodes.remove(pos))
    }

    /// Whether `target` can be reached from `start` along connections
    fn is_reachable(&self, start: &str, target: &str) -> bool {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            if current == target {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            for connection in self.connections.iter().filter(|c| c.from == current) {
                queue.push_back(&connection.to);
            }
        }
        false
    }
}
