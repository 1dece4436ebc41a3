use std::fmt;
use std::sync::atomic::AtomicI64;
use std::sync::Arc;

use accelq_common::PlanNodeId;
use arrow_schema::SchemaRef;

use crate::expr::TypedExpr;

/// Shared handle to an immutable plan node.
pub type PlanNodeRef = Arc<PlanNode>;

/// Immutable descriptor a stage is compiled from.
#[derive(Debug)]
pub struct PlanNode {
    id: PlanNodeId,
    output_schema: SchemaRef,
    kind: PlanNodeKind,
}

/// Kind-specific payload of a [`PlanNode`].
#[derive(Debug)]
pub enum PlanNodeKind {
    TableScan(TableScanNode),
    Values { rows: usize },
    Filter(FilterNode),
    Project(ProjectNode),
    HashJoin(HashJoinNode),
    OrderBy(OrderByNode),
    TopN { count: usize },
    Aggregation(AggregationNode),
    Limit(LimitNode),
    LocalPartition(LocalPartitionNode),
    AssignUniqueId(AssignUniqueIdNode),
    /// Designated consumer of a task's output pipeline.
    Output,
}

#[derive(Debug)]
pub struct TableScanNode {
    pub connector_id: String,
    pub table: String,
}

#[derive(Debug)]
pub struct FilterNode {
    pub predicate: TypedExpr,
}

#[derive(Debug)]
pub struct ProjectNode {
    pub names: Vec<String>,
    pub projections: Vec<TypedExpr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    LeftSemiFilter,
    RightSemiFilter,
    LeftSemiProject,
    RightSemiProject,
    Anti,
}

#[derive(Debug)]
pub struct HashJoinNode {
    pub join_type: JoinType,
    /// Null-aware anti join (`NOT IN` semantics).
    pub null_aware: bool,
    pub left_keys: Vec<String>,
    pub right_keys: Vec<String>,
    /// Residual filter applied to matched rows.
    pub filter: Option<TypedExpr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub ascending: bool,
    pub nulls_first: bool,
}

#[derive(Debug)]
pub struct OrderByNode {
    pub keys: Vec<SortKey>,
    pub is_partial: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationStep {
    Partial,
    Intermediate,
    Final,
    Single,
}

#[derive(Debug)]
pub struct AggregationNode {
    pub step: AggregationStep,
    pub grouping_keys: Vec<String>,
    /// `(output name, aggregate call)`.
    pub aggregates: Vec<(String, TypedExpr)>,
}

#[derive(Debug)]
pub struct LimitNode {
    pub offset: usize,
    pub count: usize,
    pub is_partial: bool,
}

/// How a local partition stage spreads rows over its consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionScheme {
    Hash { keys: Vec<String> },
    RoundRobin,
    Gather,
}

#[derive(Debug)]
pub struct LocalPartitionNode {
    pub scheme: PartitionScheme,
}

#[derive(Debug)]
pub struct AssignUniqueIdNode {
    pub id_column: String,
    /// Task-scoped namespace mixed into the high bits of every generated id.
    pub task_unique_id: i32,
    /// Counter shared by every stage instance of this node.
    pub unique_id_counter: Arc<AtomicI64>,
}

impl PlanNode {
    pub fn new(id: impl Into<PlanNodeId>, output_schema: SchemaRef, kind: PlanNodeKind) -> PlanNodeRef {
        Arc::new(Self {
            id: id.into(),
            output_schema,
            kind,
        })
    }

    pub fn id(&self) -> &PlanNodeId {
        &self.id
    }

    pub fn output_schema(&self) -> &SchemaRef {
        &self.output_schema
    }

    pub fn kind(&self) -> &PlanNodeKind {
        &self.kind
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            PlanNodeKind::TableScan(_) => "TableScan",
            PlanNodeKind::Values { .. } => "Values",
            PlanNodeKind::Filter(_) => "Filter",
            PlanNodeKind::Project(_) => "Project",
            PlanNodeKind::HashJoin(_) => "HashJoin",
            PlanNodeKind::OrderBy(_) => "OrderBy",
            PlanNodeKind::TopN { .. } => "TopN",
            PlanNodeKind::Aggregation(_) => "Aggregation",
            PlanNodeKind::Limit(_) => "Limit",
            PlanNodeKind::LocalPartition(_) => "LocalPartition",
            PlanNodeKind::AssignUniqueId(_) => "AssignUniqueId",
            PlanNodeKind::Output => "Output",
        }
    }

    pub fn as_table_scan(&self) -> Option<&TableScanNode> {
        match &self.kind {
            PlanNodeKind::TableScan(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_filter(&self) -> Option<&FilterNode> {
        match &self.kind {
            PlanNodeKind::Filter(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_project(&self) -> Option<&ProjectNode> {
        match &self.kind {
            PlanNodeKind::Project(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_hash_join(&self) -> Option<&HashJoinNode> {
        match &self.kind {
            PlanNodeKind::HashJoin(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_order_by(&self) -> Option<&OrderByNode> {
        match &self.kind {
            PlanNodeKind::OrderBy(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_aggregation(&self) -> Option<&AggregationNode> {
        match &self.kind {
            PlanNodeKind::Aggregation(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_limit(&self) -> Option<&LimitNode> {
        match &self.kind {
            PlanNodeKind::Limit(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_local_partition(&self) -> Option<&LocalPartitionNode> {
        match &self.kind {
            PlanNodeKind::LocalPartition(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_assign_unique_id(&self) -> Option<&AssignUniqueIdNode> {
        match &self.kind {
            PlanNodeKind::AssignUniqueId(n) => Some(n),
            _ => None,
        }
    }
}

impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind_name(), self.id)?;
        match &self.kind {
            PlanNodeKind::TableScan(n) => write!(f, " table={} connector={}", n.table, n.connector_id),
            PlanNodeKind::Filter(n) => write!(f, " predicate={}", n.predicate),
            PlanNodeKind::Project(n) => write!(f, " exprs={}", n.projections.len()),
            PlanNodeKind::HashJoin(n) => write!(f, " type={:?} null_aware={}", n.join_type, n.null_aware),
            PlanNodeKind::Limit(n) => write!(f, " offset={} count={}", n.offset, n.count),
            PlanNodeKind::LocalPartition(n) => write!(f, " scheme={:?}", n.scheme),
            _ => Ok(()),
        }
    }
}
