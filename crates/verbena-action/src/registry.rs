//! Name → action registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::action::{Action, DynAction};

/// Errors raised while building a registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
  /// Two actions claimed the same name.
  #[error("action '{0}' is already registered")]
  Duplicate(String),
}

/// Registry mapping stable action names to erased actions.
///
/// Built once at startup; lookups are cheap clones of `Arc`s.
#[derive(Default)]
pub struct ActionRegistry {
  actions: HashMap<&'static str, Arc<dyn DynAction>>,
}

impl ActionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a typed action under its declared name.
  pub fn register<A: Action>(&mut self, action: A) -> Result<(), RegistryError> {
    let name = Action::name(&action);
    if self.actions.contains_key(name) {
      return Err(RegistryError::Duplicate(name.to_string()));
    }
    self.actions.insert(name, Arc::new(action));
    Ok(())
  }

  /// Look up an action by name.
  pub fn get(&self, name: &str) -> Option<Arc<dyn DynAction>> {
    self.actions.get(name).cloned()
  }

  /// Names of all registered actions, for diagnostics.
  pub fn names(&self) -> Vec<&'static str> {
    let mut names: Vec<_> = self.actions.keys().copied().collect();
    names.sort_unstable();
    names
  }
}
