//! Worker capability descriptors and their YAML representation.

use crate::error::RegistryError;
use crate::types::CapabilityCategory;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Describes one worker: what it can do and what it needs to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Stable worker identifier, e.g. `branding_agent`.
    pub worker_id: String,

    /// The capability category this worker provides.
    pub capability: CapabilityCategory,

    /// Fine-grained skills within the category, used in prompts.
    #[serde(default)]
    pub specific_skills: Vec<String>,

    /// Opaque runtime requirements (api access, tooling).
    #[serde(default)]
    pub execution_requirements: HashMap<String, Value>,

    /// Capabilities that should produce results before this worker runs.
    #[serde(default)]
    pub dependencies: Vec<CapabilityCategory>,

    /// Rough duration estimate in seconds, if known.
    #[serde(default)]
    pub estimated_duration_secs: Option<u64>,
}

impl CapabilityDescriptor {
    pub fn new(worker_id: impl Into<String>, capability: CapabilityCategory) -> Self {
        Self {
            worker_id: worker_id.into(),
            capability,
            specific_skills: Vec::new(),
            execution_requirements: HashMap::new(),
            dependencies: Vec::new(),
            estimated_duration_secs: None,
        }
    }

    pub fn with_skills(mut self, skills: &[&str]) -> Self {
        self.specific_skills = skills.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_requirement(mut self, key: &str, value: Value) -> Self {
        self.execution_requirements.insert(key.to_string(), value);
        self
    }

    pub fn with_dependencies(mut self, deps: &[CapabilityCategory]) -> Self {
        self.dependencies = deps.to_vec();
        self
    }

    pub fn with_duration(mut self, secs: u64) -> Self {
        self.estimated_duration_secs = Some(secs);
        self
    }

    /// One-line summary for collaborator prompts.
    pub fn prompt_line(&self) -> String {
        format!(
            "- {} ({}): {}",
            self.worker_id,
            self.capability,
            self.specific_skills.join(", ")
        )
    }
}

/// YAML file shape: either one `worker:` or a `workers:` list.
#[derive(Debug, Deserialize)]
struct DescriptorFile {
    #[serde(default)]
    worker: Option<CapabilityDescriptor>,
    #[serde(default)]
    workers: Vec<CapabilityDescriptor>,
}

/// Parse descriptors from YAML text.
pub fn from_yaml_str(yaml: &str) -> Result<Vec<CapabilityDescriptor>, RegistryError> {
    let file: DescriptorFile = serde_yaml::from_str(yaml)?;
    let mut descriptors = file.workers;
    if let Some(single) = file.worker {
        descriptors.push(single);
    }
    if descriptors.is_empty() {
        return Err(RegistryError::InvalidDefinition {
            message: "no worker definitions found".to_string(),
        });
    }
    for descriptor in &descriptors {
        if descriptor.worker_id.trim().is_empty() {
            return Err(RegistryError::InvalidDefinition {
                message: "worker_id must not be empty".to_string(),
            });
        }
    }
    Ok(descriptors)
}

/// Parse descriptors from a YAML file on disk.
pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Vec<CapabilityDescriptor>, RegistryError> {
    let yaml = std::fs::read_to_string(path)?;
    from_yaml_str(&yaml)
}
