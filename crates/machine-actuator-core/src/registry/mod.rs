//! User-data postprocessor registry
//!
//! Postprocessors are looked up by the name stored in the user-data secret,
//! avoiding a hard-coded match in the pipeline.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use machine_actuator_core::registry::PostprocessorRegistry;
//!
//! // The built-in `ct` transform is registered by default
//! let mut registry = PostprocessorRegistry::with_defaults();
//!
//! // Register additional transforms
//! registry.register_postprocessor(Box::new(MyTransform));
//!
//! let ignition = registry.apply("ct", &rendered)?;
//! ```

use crate::error::{Error, Result};
use crate::userdata::ct::CtPostprocessor;
use std::collections::HashMap;
use std::sync::Arc;

/// A named transform applied to rendered user data
pub trait Postprocessor: Send + Sync {
    /// Name used to select this transform from the user-data secret
    fn name(&self) -> &'static str;

    /// Transform the rendered user data
    ///
    /// Problems found in the input are returned as `Error::Postprocessor`.
    fn process(&self, rendered: &str) -> Result<String>;
}

/// Registry of postprocessors keyed by name
///
/// Built once at startup and shared read-only afterwards.
#[derive(Default, Clone)]
pub struct PostprocessorRegistry {
    postprocessors: HashMap<String, Arc<dyn Postprocessor>>,
}

impl PostprocessorRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in transforms registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_postprocessor(Box::new(CtPostprocessor));
        registry
    }

    /// Register a postprocessor under its own name, replacing any previous one
    pub fn register_postprocessor(&mut self, postprocessor: Box<dyn Postprocessor>) {
        self.postprocessors
            .insert(postprocessor.name().to_string(), Arc::from(postprocessor));
    }

    /// Apply the postprocessor called `name` to `rendered`
    pub fn apply(&self, name: &str, rendered: &str) -> Result<String> {
        let postprocessor = self
            .postprocessors
            .get(name)
            .ok_or_else(|| Error::UnknownPostprocessor(name.to_string()))?;

        postprocessor.process(rendered)
    }

    /// List all registered postprocessor names
    pub fn list_postprocessors(&self) -> Vec<String> {
        let mut names: Vec<String> = self.postprocessors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a postprocessor is registered
    pub fn has_postprocessor(&self, name: &str) -> bool {
        self.postprocessors.contains_key(name)
    }
}

impl std::fmt::Debug for PostprocessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostprocessorRegistry")
            .field("postprocessors", &self.list_postprocessors())
            .finish()
    }
}
