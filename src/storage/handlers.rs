use axum::{
    Json, Router,
    extract::{Extension, Path},
    routing::{get, post},
};
use std::sync::Arc;

use super::map::PartitionedMap;
use super::protocol::{
    ENDPOINT_OP, ENDPOINT_PARTITION, ENDPOINT_QUERY, ENDPOINT_REPLICATE, ForwardRequest,
    MergeResponse, OpResult, PartitionDump, QueryResponse, ReplicateRequest, ReplicateResponse,
};
use crate::error::{GridError, Result};
use crate::index::types::IndexQuery;

pub async fn handle_forward(
    Extension(map): Extension<Arc<PartitionedMap>>,
    Json(req): Json<ForwardRequest>,
) -> Result<Json<OpResult>> {
    let expected = map.partition_of(req.op.key());
    if expected != req.partition {
        tracing::error!(
            "Forwarded {} names partition {} but key hashes to {}",
            req.op.kind(),
            req.partition,
            expected
        );
        return Err(GridError::Internal(format!(
            "partition mismatch: {} != {}",
            req.partition, expected
        )));
    }

    let result = map
        .execute_as_owner(req.partition, &req.op_id, req.op)
        .await?;
    Ok(Json(result))
}

pub async fn handle_replicate(
    Extension(map): Extension<Arc<PartitionedMap>>,
    Json(req): Json<ReplicateRequest>,
) -> Result<Json<ReplicateResponse>> {
    let applied = map.apply_replica(req)?;
    Ok(Json(ReplicateResponse { applied }))
}

pub async fn handle_partition_dump(
    Extension(map): Extension<Arc<PartitionedMap>>,
    Path(partition): Path<u32>,
) -> Result<Json<PartitionDump>> {
    let dump = map.dump_partition(partition)?;
    tracing::debug!(
        "Serving partition {} dump ({} entries)",
        partition,
        dump.entries.len()
    );
    Ok(Json(dump))
}

pub async fn handle_partition_merge(
    Extension(map): Extension<Arc<PartitionedMap>>,
    Path(partition): Path<u32>,
    Json(dump): Json<PartitionDump>,
) -> Result<Json<MergeResponse>> {
    if dump.partition != partition {
        return Err(GridError::Internal(format!(
            "dump for partition {} posted to partition {}",
            dump.partition, partition
        )));
    }
    let merged = map.merge_partition(dump)?;
    Ok(Json(MergeResponse { merged }))
}

pub async fn handle_query(
    Extension(map): Extension<Arc<PartitionedMap>>,
    Json(query): Json<IndexQuery>,
) -> Result<Json<QueryResponse>> {
    let keys = map.query_local(&query)?;
    Ok(Json(QueryResponse {
        keys: keys.into_iter().collect(),
    }))
}

/// Internal data-plane routes of `map`, namespaced by its name.
pub fn router(map: Arc<PartitionedMap>) -> Router {
    let base = map.base_path().to_string();

    Router::new()
        .route(&format!("{}{}", base, ENDPOINT_OP), post(handle_forward))
        .route(
            &format!("{}{}", base, ENDPOINT_REPLICATE),
            post(handle_replicate),
        )
        .route(
            &format!("{}{}/:partition", base, ENDPOINT_PARTITION),
            get(handle_partition_dump).post(handle_partition_merge),
        )
        .route(&format!("{}{}", base, ENDPOINT_QUERY), post(handle_query))
        .layer(Extension(map))
}
