//! Graph-neighbor queries.
//!
//! Resolves a node descriptor (id, or exact name plus optional kind/path) to
//! exactly one node, then returns its incoming/outgoing edges joined with
//! the far-side nodes, capped by `limit`.

use serde::Serialize;

use crate::error::{IndexMcpError, Result};
use crate::resolve::{resolve_workspace_root, ResolveContext};
use crate::store::{database_path, NodeRow, Store};

pub const DEFAULT_LIMIT: i64 = 16;
pub const MAX_LIMIT: i64 = 100;

#[derive(Debug, Clone, Default)]
pub struct NodeSelector {
    pub id: Option<String>,
    pub name: Option<String>,
    pub kind: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NeighborsRequest {
    pub root: Option<String>,
    pub node: NodeSelector,
    /// `incoming`, `outgoing`, or `both`.
    pub direction: Option<String>,
    pub limit: Option<i64>,
    pub database_name: Option<String>,
    pub context: ResolveContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub id: String,
    pub path: Option<String>,
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NeighborEdge {
    pub id: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub direction: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub neighbor: NodeInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct NeighborsResponse {
    pub database_path: String,
    pub node: NodeInfo,
    pub direction: String,
    pub edges: Vec<NeighborEdge>,
}

/// Look up one node and its edges.
pub async fn graph_neighbors(req: NeighborsRequest) -> Result<NeighborsResponse> {
    let direction = req.direction.as_deref().unwrap_or("outgoing").to_string();
    if !matches!(direction.as_str(), "incoming" | "outgoing" | "both") {
        return Err(IndexMcpError::invalid_input(format!(
            "direction must be incoming, outgoing, or both (got {direction:?})"
        )));
    }
    let limit = req.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let root = resolve_workspace_root(req.root.as_deref(), &req.context)?;
    let db_path = database_path(
        &root,
        req.database_name
            .as_deref()
            .unwrap_or(crate::config::DEFAULT_DATABASE_NAME),
    );
    let store = Store::open_ro(&db_path).await?;
    let result = neighbors_inner(&store, &req.node, &direction, limit).await;
    store.close().await;
    let (node, edges) = result?;

    Ok(NeighborsResponse {
        database_path: db_path.display().to_string(),
        node,
        direction,
        edges,
    })
}

async fn neighbors_inner(
    store: &Store,
    selector: &NodeSelector,
    direction: &str,
    limit: i64,
) -> Result<(NodeInfo, Vec<NeighborEdge>)> {
    let node = resolve_node(store, selector).await?;

    let mut edges = Vec::new();
    let directions: &[&'static str] = match direction {
        "incoming" => &["incoming"],
        "outgoing" => &["outgoing"],
        _ => &["incoming", "outgoing"],
    };
    for &dir in directions {
        for row in store.neighbors(&node.id, dir, limit).await? {
            edges.push(NeighborEdge {
                id: row.edge_id,
                edge_type: row.edge_type,
                direction: row.direction,
                metadata: row.metadata,
                neighbor: node_info(&row.neighbor),
            });
        }
    }

    Ok((node_info(&node), edges))
}

async fn resolve_node(store: &Store, selector: &NodeSelector) -> Result<NodeRow> {
    if let Some(id) = &selector.id {
        return store.node_by_id(id).await?.ok_or_else(|| {
            IndexMcpError::NotIndexed(format!("no graph node with id {id}"))
        });
    }

    let name = selector
        .name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            IndexMcpError::invalid_input("node requires an `id` or a `name`")
        })?;

    let matches = store
        .nodes_by_descriptor(name, selector.kind.as_deref(), selector.path.as_deref())
        .await?;

    match matches.len() {
        0 => Err(IndexMcpError::NotIndexed(format!(
            "no graph node named {name:?}; re-ingest or adjust the descriptor"
        ))),
        1 => Ok(matches.into_iter().next().unwrap()),
        n => Err(IndexMcpError::Ambiguous(format!(
            "{n} graph nodes match {name:?}; narrow with `kind` or `path`"
        ))),
    }
}

fn node_info(node: &NodeRow) -> NodeInfo {
    NodeInfo {
        id: node.id.clone(),
        path: node.path.clone(),
        kind: node.kind.clone(),
        name: node.name.clone(),
        signature: node.signature.clone(),
        metadata: node.metadata.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Embedder;
    use crate::config::IngestOptions;
    use crate::ingest::{ingest_codebase, IngestRequest};
    use std::fs;
    use tempfile::TempDir;

    async fn indexed_workspace() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("src")).unwrap();
        fs::write(
            tmp.path().join("src/b.ts"),
            "function foo(){bar();}\nfunction solo(){}\n",
        )
        .unwrap();

        let embedder = Embedder::new();
        ingest_codebase(
            &embedder,
            IngestRequest {
                root: Some(tmp.path().display().to_string()),
                options: IngestOptions::default(),
                context: ResolveContext {
                    env: Some(Default::default()),
                    ..Default::default()
                },
                sanitizer: None,
            },
        )
        .await
        .unwrap();
        tmp
    }

    fn request(tmp: &TempDir, selector: NodeSelector, direction: &str) -> NeighborsRequest {
        NeighborsRequest {
            root: Some(tmp.path().display().to_string()),
            node: selector,
            direction: Some(direction.to_string()),
            context: ResolveContext {
                env: Some(Default::default()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn outgoing_call_edge_reaches_symbol() {
        let tmp = indexed_workspace().await;
        let resp = graph_neighbors(request(
            &tmp,
            NodeSelector {
                name: Some("foo".to_string()),
                kind: Some("function".to_string()),
                ..Default::default()
            },
            "outgoing",
        ))
        .await
        .unwrap();

        assert_eq!(resp.node.name, "foo");
        assert_eq!(resp.edges.len(), 1);
        assert_eq!(resp.edges[0].edge_type, "calls");
        assert_eq!(resp.edges[0].neighbor.name, "bar");
        assert_eq!(resp.edges[0].neighbor.kind, "symbol");
    }

    #[tokio::test]
    async fn incoming_direction_flips_the_join() {
        let tmp = indexed_workspace().await;
        let resp = graph_neighbors(request(
            &tmp,
            NodeSelector {
                name: Some("bar".to_string()),
                ..Default::default()
            },
            "incoming",
        ))
        .await
        .unwrap();
        assert_eq!(resp.edges.len(), 1);
        assert_eq!(resp.edges[0].neighbor.name, "foo");
    }

    #[tokio::test]
    async fn unknown_name_is_not_indexed() {
        let tmp = indexed_workspace().await;
        let err = graph_neighbors(request(
            &tmp,
            NodeSelector {
                name: Some("missing".to_string()),
                ..Default::default()
            },
            "outgoing",
        ))
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "NotIndexed");
    }

    #[tokio::test]
    async fn invalid_direction_is_rejected() {
        let tmp = indexed_workspace().await;
        let err = graph_neighbors(request(
            &tmp,
            NodeSelector {
                name: Some("foo".to_string()),
                ..Default::default()
            },
            "sideways",
        ))
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }

    #[tokio::test]
    async fn lookup_by_id_works() {
        let tmp = indexed_workspace().await;
        let by_name = graph_neighbors(request(
            &tmp,
            NodeSelector {
                name: Some("foo".to_string()),
                ..Default::default()
            },
            "outgoing",
        ))
        .await
        .unwrap();

        let by_id = graph_neighbors(request(
            &tmp,
            NodeSelector {
                id: Some(by_name.node.id.clone()),
                ..Default::default()
            },
            "outgoing",
        ))
        .await
        .unwrap();
        assert_eq!(by_id.node.name, "foo");
    }
}
