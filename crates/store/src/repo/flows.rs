//! Registered flow definitions, keyed by name.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use ms_domain::error::{Error, Result};
use ms_domain::flow::FlowDefinition;

pub struct FlowRepository {
    path: PathBuf,
    flows: RwLock<HashMap<String, FlowDefinition>>,
}

impl FlowRepository {
    pub fn open(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("flows.json");
        let flows: HashMap<String, FlowDefinition> = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            flows: RwLock::new(flows),
        })
    }

    /// Validate and register (or replace) a flow.
    pub fn register(&self, flow: FlowDefinition) -> Result<()> {
        flow.validate()?;
        {
            let mut flows = self.flows.write();
            flows.insert(flow.name.clone(), flow);
        }
        self.persist();
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<FlowDefinition> {
        self.flows.read().get(name).cloned()
    }

    pub fn list(&self) -> Vec<FlowDefinition> {
        let mut flows: Vec<FlowDefinition> = self.flows.read().values().cloned().collect();
        flows.sort_by(|a, b| a.name.cmp(&b.name));
        flows
    }

    pub fn count(&self) -> usize {
        self.flows.read().len()
    }

    /// Load every `*.yaml` / `*.yml` file in `dir`. Returns how many
    /// flows were registered; files that fail to parse are skipped with
    /// a warning.
    pub fn load_dir(&self, dir: &Path) -> usize {
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(_) => {
                tracing::info!(path = %dir.display(), "no flow directory, skipping");
                return 0;
            }
        };
        let mut loaded = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yaml" || e == "yml");
            if !is_yaml {
                continue;
            }
            let result = std::fs::read_to_string(&path)
                .map_err(Error::Io)
                .and_then(|raw| FlowDefinition::from_yaml(&raw))
                .and_then(|flow| self.register(flow));
            match result {
                Ok(()) => loaded += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping flow file")
                }
            }
        }
        loaded
    }

    fn persist(&self) {
        let flows = self.flows.read();
        match serde_json::to_string_pretty(&*flows) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    tracing::warn!(error = %e, "flow persist failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "flow serialize failed"),
        }
    }
}
