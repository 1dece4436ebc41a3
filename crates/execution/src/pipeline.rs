//! Ordered stage sequence produced by the host compiler for one execution pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use accelq_common::{AccelError, PlanNodeId, Result};
use accelq_planner::PlanNodeRef;

use crate::stage::Stage;

/// One host pipeline plus the plan nodes its stages were compiled from.
///
/// The stage list changes only through [`Pipeline::replace_stages`].
#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
    plan_nodes: Vec<PlanNodeRef>,
    consumer_node: Option<PlanNodeRef>,
    is_output: bool,
    query_config: HashMap<String, String>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>, plan_nodes: Vec<PlanNodeRef>) -> Self {
        Self {
            stages,
            plan_nodes,
            consumer_node: None,
            is_output: false,
            query_config: HashMap::new(),
        }
    }

    /// Set the node consuming this pipeline's output (the terminal stage's node).
    pub fn with_consumer(mut self, node: PlanNodeRef) -> Self {
        self.consumer_node = Some(node);
        self
    }

    /// Mark this pipeline as the task's output pipeline.
    pub fn with_output(mut self, is_output: bool) -> Self {
        self.is_output = is_output;
        self
    }

    pub fn with_query_config(mut self, config: HashMap<String, String>) -> Self {
        self.query_config = config;
        self
    }

    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn is_output(&self) -> bool {
        self.is_output
    }

    pub fn query_config(&self) -> &HashMap<String, String> {
        &self.query_config
    }

    /// Resolve a plan-node id against the pipeline's nodes, then the consumer node.
    pub fn plan_node(&self, id: &PlanNodeId) -> Result<PlanNodeRef> {
        if let Some(node) = self.plan_nodes.iter().find(|n| n.id() == id) {
            return Ok(Arc::clone(node));
        }
        match &self.consumer_node {
            Some(node) if node.id() == id => Ok(Arc::clone(node)),
            _ => Err(AccelError::Planning(format!(
                "plan node {id} not found in pipeline"
            ))),
        }
    }

    /// Replace stages in `[start, end)` with `new_stages`, returning the removed stages.
    ///
    /// Untouched stages keep their relative order; indices after `end` shift by
    /// `new_stages.len() - (end - start)`.
    pub fn replace_stages(
        &mut self,
        start: usize,
        end: usize,
        new_stages: Vec<Arc<dyn Stage>>,
    ) -> Result<Vec<Arc<dyn Stage>>> {
        if start > end || end > self.stages.len() {
            return Err(AccelError::Planning(format!(
                "invalid stage range [{start}, {end}) for pipeline of {} stages",
                self.stages.len()
            )));
        }
        Ok(self.stages.splice(start..end, new_stages).collect())
    }

    /// Render stages one per line.
    pub fn explain(&self) -> String {
        let mut s = String::new();
        for (i, stage) in self.stages.iter().enumerate() {
            s.push_str(&format!("  #{i} {}\n", stage.describe()));
        }
        s
    }
}
