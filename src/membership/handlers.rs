use super::view::{ClusterTopology, ClusterView};

use axum::{Json, Router, extract::Extension, routing::get};
use std::sync::Arc;

/// Serves the member's current view to client gateways.
pub const ENDPOINT_CLUSTER_VIEW: &str = "/internal/cluster/view";

pub async fn handle_cluster_view(
    Extension(topology): Extension<Arc<dyn ClusterTopology>>,
) -> Json<ClusterView> {
    let view = topology.current_view();
    tracing::debug!("Serving cluster view {}", view.version);
    Json(view.as_ref().clone())
}

pub fn router(topology: Arc<dyn ClusterTopology>) -> Router {
    Router::new()
        .route(ENDPOINT_CLUSTER_VIEW, get(handle_cluster_view))
        .layer(Extension(topology))
}
