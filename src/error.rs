//! Error types shared across the engine

use crate::backend::BackendError;
use crate::render_graph::SlotDirection;
use thiserror::Error;

/// Misuse of a node's Uninitialized -> Created -> Destroyed state machine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("node '{0}' has not been created")]
    NotCreated(String),
    #[error("node '{0}' has already been created")]
    AlreadyCreated(String),
    #[error("node '{0}' has been destroyed and cannot be reused")]
    Destroyed(String),
}

/// Structural problems found while wiring or building a render graph
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("a node named '{0}' is already part of the graph")]
    DuplicateNode(String),
    #[error("no node named '{0}' in the graph")]
    UnknownNode(String),
    #[error("node '{node}' has no {direction} slot named '{slot}'")]
    UnknownSlot {
        node: String,
        slot: String,
        direction: SlotDirection,
    },
    #[error("input '{slot}' of node '{node}' is not connected")]
    UnconnectedInput { node: String, slot: String },
    #[error("output '{slot}' of node '{node}' has not produced a texture")]
    MissingOutput { node: String, slot: String },
    #[error("render graph contains cyclic dependency")]
    CyclicDependency,
    #[error("render graph has not been built")]
    NotBuilt,
}

/// Top-level error for everything the renderer can report
#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),
    #[error("failed to load font: {0}")]
    Font(String),
    #[error("failed to encode image: {0}")]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("renderer is not initialized")]
    NotInitialized,
}

pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_error_converts() {
        let err: RenderError = LifecycleError::NotCreated("blur".into()).into();
        assert!(matches!(
            err,
            RenderError::Lifecycle(LifecycleError::NotCreated(ref name)) if name == "blur"
        ));
        assert_eq!(err.to_string(), "node 'blur' has not been created");
    }

    #[test]
    fn test_unknown_slot_message() {
        let err = GraphError::UnknownSlot {
            node: "lighting".into(),
            slot: "albedo".into(),
            direction: SlotDirection::Input,
        };
        assert_eq!(
            err.to_string(),
            "node 'lighting' has no input slot named 'albedo'"
        );
    }
}
