//! Graphics session: the backend plus the shader program cache

use crate::backend::{BackendResult, GraphicsBackend, ProgramHandle};
use std::collections::HashMap;

/// Owns the graphics context and the programs linked on it
///
/// Programs are shared between nodes: the first request for a name links it, later requests
/// return the cached handle.
pub struct GraphicsSession {
    backend: Box<dyn GraphicsBackend>,
    programs: HashMap<String, ProgramHandle>,
}

impl GraphicsSession {
    pub fn new(backend: Box<dyn GraphicsBackend>) -> Self {
        log::info!("Graphics session using {}", backend.name());
        Self {
            backend,
            programs: HashMap::new(),
        }
    }

    /// Get or link the program with the given name
    pub fn program(&mut self, name: &str) -> BackendResult<ProgramHandle> {
        if let Some(handle) = self.programs.get(name) {
            return Ok(*handle);
        }
        let handle = self.backend.create_program(name)?;
        log::debug!("Linked program '{}'", name);
        self.programs.insert(name.to_string(), handle);
        Ok(handle)
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn backend(&self) -> &dyn GraphicsBackend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn GraphicsBackend {
        self.backend.as_mut()
    }

    /// Destroy every cached program
    pub fn dispose(&mut self) {
        for (name, handle) in self.programs.drain() {
            log::trace!("Destroying program '{}'", name);
            self.backend.destroy_program(handle);
        }
    }

    /// Release the programs and hand the backend back
    pub fn into_backend(mut self) -> Box<dyn GraphicsBackend> {
        self.dispose();
        self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;

    #[test]
    fn test_programs_are_cached_by_name() {
        let mut session = GraphicsSession::new(Box::new(SoftwareBackend::new(4, 4).unwrap()));
        let first = session.program("blur").unwrap();
        let second = session.program("blur").unwrap();
        assert_eq!(first, second);
        assert_ne!(session.program("ssao").unwrap(), first);
        assert_eq!(session.program_count(), 2);

        session.dispose();
        assert_eq!(session.program_count(), 0);
    }

    #[test]
    fn test_unknown_program_not_cached() {
        let mut session = GraphicsSession::new(Box::new(SoftwareBackend::new(4, 4).unwrap()));
        assert!(session.program("toon").is_err());
        assert_eq!(session.program_count(), 0);
    }
}
