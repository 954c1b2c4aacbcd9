//! Graph node contract and lifecycle

use crate::backend::TextureHandle;
use crate::error::{LifecycleError, RenderResult};
use crate::render_graph::context::{FrameContext, NodeContext};
use crate::render_graph::session::GraphicsSession;
use std::any::Any;
use std::fmt;

/// Direction of a slot relative to its node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotDirection {
    Input,
    Output,
}

impl fmt::Display for SlotDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotDirection::Input => f.write_str("input"),
            SlotDirection::Output => f.write_str("output"),
        }
    }
}

/// Kind of resource a slot carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture2d,
}

/// A named, typed endpoint on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub name: &'static str,
    pub kind: ResourceKind,
}

impl Slot {
    pub const fn texture(name: &'static str) -> Self {
        Self {
            name,
            kind: ResourceKind::Texture2d,
        }
    }
}

/// Lifecycle state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeState {
    #[default]
    Uninitialized,
    Created,
    Destroyed,
}

/// Name and state bookkeeping shared by every node implementation
#[derive(Debug, Clone)]
pub struct NodeLifecycle {
    name: String,
    state: NodeState,
}

impl NodeLifecycle {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: NodeState::Uninitialized,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Check that the node may be created
    pub fn begin_create(&self) -> Result<(), LifecycleError> {
        match self.state {
            NodeState::Uninitialized => Ok(()),
            NodeState::Created => Err(LifecycleError::AlreadyCreated(self.name.clone())),
            NodeState::Destroyed => Err(LifecycleError::Destroyed(self.name.clone())),
        }
    }

    /// Check that the node may render or be destroyed
    pub fn check_created(&self) -> Result<(), LifecycleError> {
        match self.state {
            NodeState::Created => Ok(()),
            NodeState::Uninitialized => Err(LifecycleError::NotCreated(self.name.clone())),
            NodeState::Destroyed => Err(LifecycleError::Destroyed(self.name.clone())),
        }
    }

    pub fn mark_created(&mut self) {
        log::debug!("Node '{}' created", self.name);
        self.state = NodeState::Created;
    }

    pub fn mark_destroyed(&mut self) {
        log::debug!("Node '{}' destroyed", self.name);
        self.state = NodeState::Destroyed;
    }
}

/// A unit of GPU work in the render graph
///
/// Nodes declare their input and output slots statically. The graph resolves inputs to
/// producer textures before calling [`GraphNode::create`], and runs [`GraphNode::render`]
/// in dependency order every frame.
pub trait GraphNode: Any {
    /// Unique name of this node within its graph
    fn name(&self) -> &str;

    fn state(&self) -> NodeState;

    fn input_slots(&self) -> &'static [Slot] {
        &[]
    }

    fn output_slots(&self) -> &'static [Slot];

    /// Texture produced on an output slot, available once created
    fn output(&self, slot: &str) -> Option<TextureHandle>;

    /// Allocate owned resources and build the node's pipeline
    fn create(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()>;

    /// Release owned resources
    fn destroy(&mut self, session: &mut GraphicsSession) -> RenderResult<()>;

    /// Execute the node's pipeline
    fn render(&mut self, ctx: &mut FrameContext<'_>) -> RenderResult<()>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn has_input(&self, slot: &str) -> bool {
        self.input_slots().iter().any(|s| s.name == slot)
    }

    fn has_output(&self, slot: &str) -> bool {
        self.output_slots().iter().any(|s| s.name == slot)
    }
}
