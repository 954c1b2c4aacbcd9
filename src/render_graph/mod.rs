//! Render Graph System
//!
//! Nodes with named texture slots, connected into a directed acyclic graph. The graph
//! orders nodes by their connections, creates them with their inputs resolved, and runs
//! each node's fixed pipeline every frame.

pub mod context;
pub mod graph;
pub mod node;
pub mod pipeline;
pub mod session;

pub use context::*;
pub use graph::*;
pub use node::*;
pub use pipeline::*;
pub use session::*;
