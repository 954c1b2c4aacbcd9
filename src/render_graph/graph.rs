//! Render graph definition and compilation

use crate::backend::TextureHandle;
use crate::error::{GraphError, RenderResult};
use crate::render_graph::context::{FrameContext, FrameUniforms, GraphParams, NodeContext};
use crate::render_graph::node::{GraphNode, NodeState, SlotDirection};
use crate::render_graph::session::GraphicsSession;
use std::collections::{HashMap, HashSet, VecDeque};

/// `(producer, output) -> (consumer, input)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub producer: String,
    pub output: &'static str,
    pub consumer: String,
    pub input: &'static str,
}

/// The main render graph structure
pub struct RenderGraph {
    nodes: Vec<Box<dyn GraphNode>>,
    node_indices: HashMap<String, usize>,
    connections: Vec<Connection>,
    /// Node indices in execution order, present once built
    order: Option<Vec<usize>>,
    params: GraphParams,
}

impl RenderGraph {
    pub fn new(params: GraphParams) -> Self {
        Self {
            nodes: Vec::new(),
            node_indices: HashMap::new(),
            connections: Vec::new(),
            order: None,
            params,
        }
    }

    pub fn params(&self) -> &GraphParams {
        &self.params
    }

    /// Replace the frame parameters. Nodes read them when created, so a built graph must be
    /// recreated for sizes to take effect.
    pub fn set_params(&mut self, params: GraphParams) {
        self.params = params;
    }

    /// Add a node to the graph
    pub fn add_node<N: GraphNode>(&mut self, node: N) -> RenderResult<()> {
        let name = node.name().to_string();
        if self.node_indices.contains_key(&name) {
            return Err(GraphError::DuplicateNode(name).into());
        }
        log::debug!("Adding node '{}' to render graph", name);
        self.node_indices.insert(name, self.nodes.len());
        self.nodes.push(Box::new(node));
        self.order = None;
        Ok(())
    }

    /// Wire `producer.output` into `consumer.input`. Replaces an existing wire on that input.
    pub fn connect(
        &mut self,
        consumer: &str,
        input: &str,
        output: &str,
        producer: &str,
    ) -> RenderResult<()> {
        let consumer_node = self.node(consumer).ok_or_else(|| GraphError::UnknownNode(consumer.into()))?;
        let input_slot = consumer_node
            .input_slots()
            .iter()
            .find(|slot| slot.name == input)
            .ok_or_else(|| GraphError::UnknownSlot {
                node: consumer.into(),
                slot: input.into(),
                direction: SlotDirection::Input,
            })?;

        let producer_node = self.node(producer).ok_or_else(|| GraphError::UnknownNode(producer.into()))?;
        let output_slot = producer_node
            .output_slots()
            .iter()
            .find(|slot| slot.name == output)
            .ok_or_else(|| GraphError::UnknownSlot {
                node: producer.into(),
                slot: output.into(),
                direction: SlotDirection::Output,
            })?;

        let connection = Connection {
            producer: producer.to_string(),
            output: output_slot.name,
            consumer: consumer.to_string(),
            input: input_slot.name,
        };
        log::debug!(
            "Connecting {}.{} -> {}.{}",
            producer,
            output_slot.name,
            consumer,
            input_slot.name
        );

        self.connections
            .retain(|c| !(c.consumer == connection.consumer && c.input == connection.input));
        self.connections.push(connection);
        self.order = None;
        Ok(())
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Validate the wiring, sort the nodes and create them in dependency order. If a node
    /// fails to create, the nodes created before it are destroyed.
    pub fn rebuild(&mut self, session: &mut GraphicsSession) -> RenderResult<()> {
        let order = self.compile()?;

        for (position, &index) in order.iter().enumerate() {
            if let Err(err) = self.create_node(index, session) {
                log::error!("Failed to create node '{}': {}", self.nodes[index].name(), err);
                for &created in order[..position].iter().rev() {
                    let node = &mut self.nodes[created];
                    if let Err(destroy) = node.destroy(session) {
                        log::error!("Failed to destroy node '{}': {}", node.name(), destroy);
                    }
                }
                return Err(err);
            }
        }

        log::info!(
            "Render graph built: {}",
            order
                .iter()
                .map(|&i| self.nodes[i].name())
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        self.order = Some(order);
        Ok(())
    }

    fn create_node(&mut self, index: usize, session: &mut GraphicsSession) -> RenderResult<()> {
        let inputs = self.resolve_inputs(index, session)?;
        let node = &mut self.nodes[index];
        let name = node.name().to_string();
        let mut ctx = NodeContext {
            session,
            params: &self.params,
            node: &name,
            inputs: &inputs,
        };
        node.create(&mut ctx)
    }

    /// Check every input is wired and sort nodes with Kahn's algorithm
    fn compile(&self) -> RenderResult<Vec<usize>> {
        for node in &self.nodes {
            for slot in node.input_slots() {
                let wired = self
                    .connections
                    .iter()
                    .any(|c| c.consumer == node.name() && c.input == slot.name);
                if !wired {
                    return Err(GraphError::UnconnectedInput {
                        node: node.name().to_string(),
                        slot: slot.name.to_string(),
                    }
                    .into());
                }
            }
        }

        let mut dependencies: Vec<HashSet<usize>> = vec![HashSet::new(); self.nodes.len()];
        for connection in &self.connections {
            let consumer = self.index_of(&connection.consumer)?;
            let producer = self.index_of(&connection.producer)?;
            dependencies[consumer].insert(producer);
        }

        let mut in_degree: Vec<usize> = dependencies.iter().map(HashSet::len).collect();
        let mut queue: VecDeque<usize> = (0..self.nodes.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut sorted = Vec::with_capacity(self.nodes.len());

        while let Some(index) = queue.pop_front() {
            sorted.push(index);
            for (dependent, deps) in dependencies.iter().enumerate() {
                if deps.contains(&index) {
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if sorted.len() != self.nodes.len() {
            return Err(GraphError::CyclicDependency.into());
        }
        Ok(sorted)
    }

    fn index_of(&self, name: &str) -> Result<usize, GraphError> {
        self.node_indices
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode(name.to_string()))
    }

    /// Producer textures for every input of a node
    fn resolve_inputs(
        &self,
        index: usize,
        session: &GraphicsSession,
    ) -> RenderResult<HashMap<&'static str, TextureHandle>> {
        let consumer = self.nodes[index].name();
        let mut inputs = HashMap::new();
        for connection in self.connections.iter().filter(|c| c.consumer == consumer) {
            let producer = &self.nodes[self.index_of(&connection.producer)?];
            let missing = || GraphError::MissingOutput {
                node: connection.producer.clone(),
                slot: connection.output.to_string(),
            };
            let texture = producer.output(connection.output).ok_or_else(missing)?;
            if session.backend().texture_descriptor(texture).is_none() {
                return Err(missing().into());
            }
            inputs.insert(connection.input, texture);
        }
        Ok(inputs)
    }

    /// Render every node in execution order
    pub fn render(&mut self, session: &mut GraphicsSession, frame: &FrameUniforms) -> RenderResult<()> {
        let order = self.order.as_ref().ok_or(GraphError::NotBuilt)?;
        for &index in order {
            let mut ctx = FrameContext {
                session: &mut *session,
                params: &self.params,
                frame,
            };
            self.nodes[index].render(&mut ctx)?;
        }
        Ok(())
    }

    /// Destroy created nodes, consumers first. Every node is visited even if one fails;
    /// the first error is returned.
    pub fn destroy(&mut self, session: &mut GraphicsSession) -> RenderResult<()> {
        let order: Vec<usize> = match self.order.take() {
            Some(order) => order,
            None => (0..self.nodes.len()).collect(),
        };

        let mut first_error = None;
        for &index in order.iter().rev() {
            let node = &mut self.nodes[index];
            if node.state() != NodeState::Created {
                continue;
            }
            if let Err(err) = node.destroy(session) {
                log::error!("Failed to destroy node '{}': {}", node.name(), err);
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn is_built(&self) -> bool {
        self.order.is_some()
    }

    /// Node names in execution order, empty until built
    pub fn execution_order(&self) -> Vec<&str> {
        self.order
            .iter()
            .flatten()
            .map(|&i| self.nodes[i].name())
            .collect()
    }

    pub fn node(&self, name: &str) -> Option<&dyn GraphNode> {
        let index = *self.node_indices.get(name)?;
        Some(self.nodes[index].as_ref())
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut dyn GraphNode> {
        let index = *self.node_indices.get(name)?;
        Some(self.nodes[index].as_mut())
    }

    /// Get a node by name and concrete type
    pub fn get_node<T: GraphNode>(&self, name: &str) -> Option<&T> {
        self.node(name)?.as_any().downcast_ref::<T>()
    }

    pub fn get_node_mut<T: GraphNode>(&mut self, name: &str) -> Option<&mut T> {
        self.node_mut(name)?.as_any_mut().downcast_mut::<T>()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SoftwareBackend, TextureDescriptor, TextureFormat};
    use crate::error::RenderError;
    use crate::render_graph::node::{NodeLifecycle, Slot};
    use std::any::Any;

    /// Node owning one texture, optionally reading one
    struct TestNode {
        lifecycle: NodeLifecycle,
        inputs: &'static [Slot],
        texture: Option<TextureHandle>,
        size: u32,
        renders: usize,
    }

    const COLORS: &[Slot] = &[Slot::texture("colors")];

    impl TestNode {
        fn source(name: &str) -> Self {
            Self {
                lifecycle: NodeLifecycle::new(name),
                inputs: &[],
                texture: None,
                size: 2,
                renders: 0,
            }
        }

        fn filter(name: &str) -> Self {
            Self {
                inputs: COLORS,
                ..Self::source(name)
            }
        }
    }

    impl GraphNode for TestNode {
        fn name(&self) -> &str {
            self.lifecycle.name()
        }

        fn state(&self) -> NodeState {
            self.lifecycle.state()
        }

        fn input_slots(&self) -> &'static [Slot] {
            self.inputs
        }

        fn output_slots(&self) -> &'static [Slot] {
            COLORS
        }

        fn output(&self, slot: &str) -> Option<TextureHandle> {
            (slot == "colors").then_some(self.texture).flatten()
        }

        fn create(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
            self.lifecycle.begin_create()?;
            for slot in self.inputs {
                ctx.input(slot.name)?;
            }
            let desc = TextureDescriptor::new(self.name(), self.size, self.size, TextureFormat::Rgba8Unorm);
            self.texture = Some(ctx.session.backend_mut().create_texture(&desc)?);
            self.lifecycle.mark_created();
            Ok(())
        }

        fn destroy(&mut self, session: &mut GraphicsSession) -> RenderResult<()> {
            self.lifecycle.check_created()?;
            if let Some(texture) = self.texture.take() {
                session.backend_mut().destroy_texture(texture);
            }
            self.lifecycle.mark_destroyed();
            Ok(())
        }

        fn render(&mut self, _ctx: &mut FrameContext<'_>) -> RenderResult<()> {
            self.lifecycle.check_created()?;
            self.renders += 1;
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn session() -> GraphicsSession {
        GraphicsSession::new(Box::new(SoftwareBackend::new(4, 4).unwrap()))
    }

    #[test]
    fn test_order_follows_connections_not_registration() {
        let mut graph = RenderGraph::new(GraphParams::default());
        graph.add_node(TestNode::filter("c")).unwrap();
        graph.add_node(TestNode::filter("b")).unwrap();
        graph.add_node(TestNode::source("a")).unwrap();
        graph.connect("b", "colors", "colors", "a").unwrap();
        graph.connect("c", "colors", "colors", "b").unwrap();

        let mut session = session();
        graph.rebuild(&mut session).unwrap();
        assert_eq!(graph.execution_order(), vec!["a", "b", "c"]);

        graph.render(&mut session, &FrameUniforms::default()).unwrap();
        assert_eq!(graph.get_node::<TestNode>("c").unwrap().renders, 1);
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut graph = RenderGraph::new(GraphParams::default());
        graph.add_node(TestNode::source("a")).unwrap();
        let result = graph.add_node(TestNode::source("a"));
        assert!(matches!(
            result,
            Err(RenderError::Graph(GraphError::DuplicateNode(ref name))) if name == "a"
        ));
    }

    #[test]
    fn test_connect_validates_slots() {
        let mut graph = RenderGraph::new(GraphParams::default());
        graph.add_node(TestNode::source("a")).unwrap();
        graph.add_node(TestNode::filter("b")).unwrap();

        assert!(matches!(
            graph.connect("b", "colors", "colors", "missing"),
            Err(RenderError::Graph(GraphError::UnknownNode(_)))
        ));
        assert!(matches!(
            graph.connect("b", "depths", "colors", "a"),
            Err(RenderError::Graph(GraphError::UnknownSlot {
                direction: SlotDirection::Input,
                ..
            }))
        ));
        assert!(matches!(
            graph.connect("b", "colors", "normals", "a"),
            Err(RenderError::Graph(GraphError::UnknownSlot {
                direction: SlotDirection::Output,
                ..
            }))
        ));
    }

    #[test]
    fn test_render_before_build_fails() {
        let mut graph = RenderGraph::new(GraphParams::default());
        graph.add_node(TestNode::source("a")).unwrap();
        let result = graph.render(&mut session(), &FrameUniforms::default());
        assert!(matches!(result, Err(RenderError::Graph(GraphError::NotBuilt))));
    }

    #[test]
    fn test_failed_rebuild_destroys_created_nodes() {
        let mut graph = RenderGraph::new(GraphParams::default());
        graph.add_node(TestNode::source("a")).unwrap();
        graph
            .add_node(TestNode {
                size: 64,
                ..TestNode::filter("b")
            })
            .unwrap();
        graph.connect("b", "colors", "colors", "a").unwrap();

        let backend = SoftwareBackend::new(4, 4).unwrap().with_max_texture_size(16);
        let mut session = GraphicsSession::new(Box::new(backend));
        let result = graph.rebuild(&mut session);
        assert!(matches!(result, Err(RenderError::Backend(_))));

        assert_eq!(session.backend().texture_count(), 0);
        assert_eq!(graph.node("a").unwrap().state(), NodeState::Destroyed);
        assert_eq!(graph.node("b").unwrap().state(), NodeState::Uninitialized);
        assert!(!graph.is_built());
    }

    #[test]
    fn test_destroy_releases_textures() {
        let mut graph = RenderGraph::new(GraphParams::default());
        graph.add_node(TestNode::source("a")).unwrap();
        graph.add_node(TestNode::filter("b")).unwrap();
        graph.connect("b", "colors", "colors", "a").unwrap();

        let mut session = session();
        graph.rebuild(&mut session).unwrap();
        let texture = graph.node("a").unwrap().output("colors").unwrap();
        assert!(session.backend().texture_descriptor(texture).is_some());

        graph.destroy(&mut session).unwrap();
        assert!(session.backend().texture_descriptor(texture).is_none());
        assert_eq!(graph.node("b").unwrap().state(), NodeState::Destroyed);
        assert!(!graph.is_built());
    }
}
