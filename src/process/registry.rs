/// Hot-reload process registry using ArcSwap
///
/// Keeps every deployed process in compiled form: validated at deploy time,
/// with a reverse index from each task to the stages gated on it. Readers
/// never block; a deploy swaps the whole map pointer.

use crate::error::{EngineError, Result};
use crate::process::{
    storage::ProcessStorage,
    types::{ProcessConfig, START_STAGE},
};
use arc_swap::ArcSwap;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Validated process definition with readiness lookup tables
#[derive(Debug, Clone)]
pub struct CompiledProcess {
    /// Base process definition
    pub config: ProcessConfig,
    /// task -> stage that activates it
    stage_of_task: BTreeMap<String, String>,
    /// task -> stages whose gate lists it
    gated_by: BTreeMap<String, Vec<String>>,
}

impl CompiledProcess {
    /// Validate a config and build its lookup tables.
    ///
    /// Rejected configs: no `start` stage, a gated `start`, a non-start stage
    /// without a gate, a gate for an unknown stage, a gate naming an unknown
    /// task, a task activated by two stages, or a cycle between stages.
    pub fn compile(config: ProcessConfig) -> Result<Self> {
        let invalid = |msg: String| EngineError::InvalidConfig(format!("{}: {}", config.process_id, msg));

        if config.process_id.trim().is_empty() {
            return Err(EngineError::InvalidConfig("process_id must not be empty".into()));
        }
        if !config.stage_tasks.contains_key(START_STAGE) {
            return Err(invalid(format!("missing '{}' stage", START_STAGE)));
        }

        let mut stage_of_task = BTreeMap::new();
        for (stage, tasks) in &config.stage_tasks {
            if tasks.is_empty() {
                return Err(invalid(format!("stage '{}' activates no tasks", stage)));
            }
            for task in tasks {
                if let Some(previous) = stage_of_task.insert(task.clone(), stage.clone()) {
                    return Err(invalid(format!(
                        "task '{}' is activated by both '{}' and '{}'",
                        task, previous, stage
                    )));
                }
            }
        }

        for (stage, gate) in &config.stage_gates {
            if !config.stage_tasks.contains_key(stage) {
                return Err(invalid(format!("gate defined for unknown stage '{}'", stage)));
            }
            if stage == START_STAGE && !gate.is_empty() {
                return Err(invalid(format!("'{}' stage cannot be gated", START_STAGE)));
            }
            for task in gate {
                if !stage_of_task.contains_key(task) {
                    return Err(invalid(format!(
                        "gate of stage '{}' references unknown task '{}'",
                        stage, task
                    )));
                }
            }
        }

        for stage in config.stage_tasks.keys() {
            let gated = config.stage_gates.get(stage).is_some_and(|g| !g.is_empty());
            if stage != START_STAGE && !gated {
                return Err(invalid(format!("stage '{}' has no gate", stage)));
            }
        }

        check_acyclic(&config, &stage_of_task).map_err(invalid)?;

        let mut gated_by: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (stage, gate) in &config.stage_gates {
            let unique: BTreeSet<&String> = gate.iter().collect();
            for task in unique {
                gated_by.entry(task.clone()).or_default().push(stage.clone());
            }
        }

        Ok(Self {
            config,
            stage_of_task,
            gated_by,
        })
    }

    pub fn process_id(&self) -> &str {
        &self.config.process_id
    }

    pub fn has_task(&self, task: &str) -> bool {
        self.stage_of_task.contains_key(task)
    }

    /// Every task of the process
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.stage_of_task.keys().map(String::as_str)
    }

    /// Stages with a non-empty gate
    pub fn gated_stages(&self) -> impl Iterator<Item = &str> {
        self.config
            .stage_gates
            .iter()
            .filter(|(_, gate)| !gate.is_empty())
            .map(|(stage, _)| stage.as_str())
    }

    /// Tasks a stage activates, in declaration order
    pub fn stage_tasks(&self, stage: &str) -> &[String] {
        self.config
            .stage_tasks
            .get(stage)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn stage_gate(&self, stage: &str) -> &[String] {
        self.config
            .stage_gates
            .get(stage)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Stages whose readiness can change when `task` completes
    pub fn stages_gated_on(&self, task: &str) -> &[String] {
        self.gated_by.get(task).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Stage graph: an edge from the stage activating a gate task to the gated
/// stage. A cycle would leave its stages unpublishable forever.
fn check_acyclic(
    config: &ProcessConfig,
    stage_of_task: &BTreeMap<String, String>,
) -> std::result::Result<(), String> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    for stage in config.stage_tasks.keys() {
        index.insert(stage.as_str(), graph.add_node(stage.as_str()));
    }

    for (stage, gate) in &config.stage_gates {
        for task in gate {
            let upstream = &stage_of_task[task];
            graph.update_edge(index[upstream.as_str()], index[stage.as_str()], ());
        }
    }

    toposort(&graph, None)
        .map(|_| ())
        .map_err(|cycle| format!("stage '{}' depends on itself", graph[cycle.node_id()]))
}

/// Lock-free registry of compiled processes
#[derive(Debug)]
pub struct ProcessRegistry {
    /// Key: process_id, Value: compiled process
    processes: ArcSwap<HashMap<String, Arc<CompiledProcess>>>,
    storage: ProcessStorage,
}

impl ProcessRegistry {
    pub fn new(storage: ProcessStorage) -> Self {
        Self {
            processes: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    /// Load and compile every stored process config
    pub async fn init_from_storage(&self) -> Result<()> {
        let mut compiled = HashMap::new();
        for config in self.storage.load_all_process_configs().await? {
            let id = config.process_id.clone();
            match CompiledProcess::compile(config) {
                Ok(process) => {
                    compiled.insert(id, Arc::new(process));
                }
                Err(e) => tracing::error!("❌ Skipping stored process '{}': {}", id, e),
            }
        }

        self.processes.store(Arc::new(compiled));
        tracing::info!(
            "Initialized process registry with {} processes",
            self.processes.load().len()
        );
        Ok(())
    }

    /// Validate, persist and hot-load a new process config
    pub async fn deploy(&self, config: ProcessConfig) -> Result<Arc<CompiledProcess>> {
        let compiled = Arc::new(CompiledProcess::compile(config)?);

        if !self.storage.insert_process_config(&compiled.config).await? {
            return Err(EngineError::ConfigExists(compiled.process_id().to_string()));
        }

        self.processes.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(compiled.process_id().to_string(), Arc::clone(&compiled));
            next
        });

        tracing::info!("🔥 Deployed process: {}", compiled.process_id());
        Ok(compiled)
    }

    /// Get a compiled process, falling back to storage on a cache miss
    pub async fn get(&self, process_id: &str) -> Result<Arc<CompiledProcess>> {
        if let Some(process) = self.processes.load().get(process_id) {
            return Ok(Arc::clone(process));
        }

        let config = self
            .storage
            .get_process_config(process_id)
            .await?
            .ok_or_else(|| EngineError::ConfigNotFound(process_id.to_string()))?;
        let compiled = Arc::new(CompiledProcess::compile(config)?);

        self.processes.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(process_id.to_string(), Arc::clone(&compiled));
            next
        });
        Ok(compiled)
    }
}
