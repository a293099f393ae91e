//! Source graph resolution.
//!
//! Virtual sources reference children by id. Flattening walks the graph
//! depth-first in declared child order and yields one entry per path to a
//! leaf, so a leaf reachable twice contributes twice.

use std::collections::HashSet;
use std::sync::Arc;

use meterline_store::SourceCatalog;
use meterline_types::{EngineError, EngineResult, Source, SourceId};
use serde::Serialize;
use tracing::trace;

/// A leaf reached while flattening, with the virtual sources above it.
#[derive(Debug, Clone, Serialize)]
pub struct FlatLeaf {
    pub leaf: Source,

    /// Virtual ancestors from the root down to the leaf's parent.
    pub ancestors: Vec<SourceId>,
}

/// Resolves source ids against a catalog.
#[derive(Clone)]
pub struct SourceGraph {
    catalog: Arc<dyn SourceCatalog>,
}

struct Frame {
    source: Source,
    next_child: usize,
}

impl SourceGraph {
    pub fn new(catalog: Arc<dyn SourceCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<dyn SourceCatalog> {
        &self.catalog
    }

    /// Look up one source.
    pub async fn resolve(&self, id: &SourceId) -> EngineResult<Source> {
        self.catalog
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found(id.clone()))
    }

    async fn resolve_child(&self, id: &SourceId, parent: &SourceId) -> EngineResult<Source> {
        self.catalog
            .get(id)
            .await?
            .ok_or_else(|| EngineError::ResourceNotFound {
                source_id: id.clone(),
                referenced_by: Some(parent.clone()),
            })
    }

    /// Flatten `id` into its leaf contributors, in traversal order.
    pub async fn flatten(&self, id: &SourceId) -> EngineResult<Vec<FlatLeaf>> {
        let root = self.resolve(id).await?;
        if root.is_leaf() {
            return Ok(vec![FlatLeaf {
                leaf: root,
                ancestors: Vec::new(),
            }]);
        }

        let mut leaves = Vec::new();
        let mut on_path: HashSet<SourceId> = HashSet::from([root.id.clone()]);
        let mut path = vec![Frame {
            source: root,
            next_child: 0,
        }];

        while let Some(frame) = path.last_mut() {
            let Some(child_id) = frame.source.children().get(frame.next_child).cloned() else {
                on_path.remove(&frame.source.id);
                path.pop();
                continue;
            };
            frame.next_child += 1;
            let parent_id = frame.source.id.clone();

            if on_path.contains(&child_id) {
                let mut cycle: Vec<SourceId> = path.iter().map(|f| f.source.id.clone()).collect();
                cycle.push(child_id);
                return Err(EngineError::CycleDetected { path: cycle });
            }

            let child = self.resolve_child(&child_id, &parent_id).await?;
            if child.is_leaf() {
                leaves.push(FlatLeaf {
                    leaf: child,
                    ancestors: path.iter().map(|f| f.source.id.clone()).collect(),
                });
            } else {
                on_path.insert(child.id.clone());
                path.push(Frame {
                    source: child,
                    next_child: 0,
                });
            }
        }

        trace!(source = %id, leaves = leaves.len(), "Flattened source");
        Ok(leaves)
    }
}
