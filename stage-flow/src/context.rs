use dashmap::DashMap;
use serde_json::Value;
use std::sync::{Arc, Mutex};

use crate::error::{FlowError, Result};

/// Shared state threaded through a pipeline run.
///
/// Two kinds of entries live here: plain keys (scratch values such as the
/// run's input id) and *sections* — named, insert-only slots that each stage
/// contributes exactly once. Sections can never be overwritten, so state
/// carried forward is always the union of all prior stage contributions.
#[derive(Clone, Debug)]
pub struct Context {
    data: Arc<DashMap<String, Value>>,
    // Section names in insertion order, for ordered snapshots.
    sections: Arc<Mutex<Vec<String>>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            sections: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set a plain key. Overwriting is allowed for plain keys.
    pub async fn set(&self, key: impl Into<String>, value: impl serde::Serialize) -> Result<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| FlowError::ContextError(format!("failed to serialize value: {e}")))?;
        self.data.insert(key.into(), value);
        Ok(())
    }

    pub async fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Non-async accessor for use inside edge conditions.
    pub fn get_sync<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Add a named section. Fails with [`FlowError::SectionConflict`] if a
    /// section with this name was already written by an earlier task.
    pub async fn add_section(
        &self,
        name: impl Into<String>,
        value: impl serde::Serialize,
    ) -> Result<()> {
        let name = name.into();
        let value = serde_json::to_value(value)
            .map_err(|e| FlowError::ContextError(format!("failed to serialize section: {e}")))?;

        {
            let mut sections = self.sections.lock().unwrap();
            if sections.contains(&name) {
                return Err(FlowError::SectionConflict(name));
            }
            sections.push(name.clone());
        }
        self.data.insert(name, value);
        Ok(())
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.lock().unwrap().iter().any(|s| s == name)
    }

    /// Section names in the order they were added.
    pub fn section_names(&self) -> Vec<String> {
        self.sections.lock().unwrap().clone()
    }

    /// Snapshot of all sections in insertion order. Plain keys are not
    /// included; they are scratch state, not stage output.
    pub fn snapshot(&self) -> serde_json::Map<String, Value> {
        let mut map = serde_json::Map::new();
        for name in self.section_names() {
            if let Some(value) = self.data.get(&name) {
                map.insert(name, value.clone());
            }
        }
        map
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
