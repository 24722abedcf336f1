//! HTTP handlers for the REST API (spec §6).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::ingest::envelope::ScanIngest;
use crate::store::types::{
    ImageFilters, Paging, ScanFilters, UpdateContext, VulnerabilityFilters, WebhookConfig,
};

use super::dto::{
    BulkPatchRequest, BulkPatchResponse, DashboardMetrics, HealthResponse, ImageHistoryQuery,
    ListImagesQuery, ListScansQuery, ListVulnerabilitiesQuery, MetricsQuery,
    PatchVulnerabilityRequest, Paged, ScanDetailQuery, WebhookConfigRequest,
};
use super::server::AppState;

#[instrument]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[instrument]
pub async fn ready() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ready",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(feature = "metrics")]
pub async fn prometheus_metrics() -> Result<String> {
    crate::controller::metrics::encode_metrics()
        .map_err(|e| Error::ConfigError(format!("metrics encode failed: {e}")))
}

async fn resolve_identity(state: &AppState, headers: &HeaderMap) -> Result<String> {
    let email = headers
        .get("x-auth-request-email")
        .and_then(|v| v.to_str().ok());
    let token = headers
        .get("x-auth-request-access-token")
        .and_then(|v| v.to_str().ok());

    crate::identity::resolve_identity(state.jwks_validator.as_deref(), email, token)
        .await
        .map_err(Error::Unauthorized)
}

#[instrument(skip(state, headers, envelope))]
pub async fn create_scan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(envelope): Json<ScanIngest>,
) -> Result<(StatusCode, Json<crate::ingest::envelope::ScanResponse>)> {
    resolve_identity(&state, &headers).await?;

    let outcome = state.ingest.ingest(envelope).await?;
    Ok((
        StatusCode::CREATED,
        Json(crate::ingest::envelope::ScanResponse {
            id: outcome.scan_id,
            image_id: outcome.image_id,
        }),
    ))
}

#[instrument(skip(state))]
pub async fn list_scans(
    State(state): State<AppState>,
    Query(query): Query<ListScansQuery>,
) -> Result<Json<Paged<crate::store::types::Scan>>> {
    let paging = Paging {
        limit: query.limit.unwrap_or(50).clamp(1, 500),
        offset: query.offset.unwrap_or(0).max(0),
    };
    let filters = ScanFilters {
        image_id: query.image_id,
        image_name: query.image,
        has_fix: query.has_fix,
    };
    let (data, total) = state.repos.scans.list(paging, filters).await?;
    Ok(Json(Paged {
        data,
        total,
        limit: paging.limit,
        offset: paging.offset,
    }))
}

#[derive(serde::Serialize)]
pub struct ScanDetailResponse {
    #[serde(flatten)]
    pub detail: ScanDetailDto,
    pub vulnerabilities: Vec<crate::store::types::Vulnerability>,
}

#[derive(serde::Serialize)]
pub struct ScanDetailDto {
    pub scan: crate::store::types::Scan,
    pub counts: crate::store::types::SeverityCounts,
    pub total: i64,
}

#[instrument(skip(state))]
pub async fn get_scan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ScanDetailQuery>,
) -> Result<Json<ScanDetailResponse>> {
    let detail = state
        .repos
        .scans
        .get_with_details(id, query.has_fix)
        .await?
        .ok_or_else(|| Error::NotFound(format!("scan {id}")))?;
    let vulnerabilities = state.repos.scans.get_vulnerabilities(id).await?;

    Ok(Json(ScanDetailResponse {
        detail: ScanDetailDto {
            scan: detail.scan,
            counts: detail.counts,
            total: detail.total,
        },
        vulnerabilities,
    }))
}

#[instrument(skip(state))]
pub async fn get_scan_sbom(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Vec<u8>> {
    state
        .repos
        .scans
        .get_with_details(id, None)
        .await?
        .ok_or_else(|| Error::NotFound(format!("scan {id}")))?;
    state.repos.sbom_objects.get(id).await
}

#[instrument(skip(state))]
pub async fn get_scan_diff(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::ingest::diff::ScanDiff>> {
    let detail = state
        .repos
        .scans
        .get_with_details(id, None)
        .await?
        .ok_or_else(|| Error::NotFound(format!("scan {id}")))?;

    let current = state.repos.scans.get_vulnerabilities(id).await?;
    let previous_scan = state
        .repos
        .scans
        .get_previous(detail.scan.image_id, detail.scan.scan_date)
        .await?;
    let previous = match &previous_scan {
        Some(s) => state.repos.scans.get_vulnerabilities(s.id).await?,
        None => Vec::new(),
    };

    let to_keys = |vulns: &[crate::store::types::Vulnerability]| {
        vulns
            .iter()
            .map(|v| crate::ingest::envelope::NormalizedFinding {
                cve_id: v.cve_id.clone(),
                package_name: v.package_name.clone(),
                package_version: v.package_version.clone(),
            })
            .collect::<Vec<_>>()
    };

    let diff = crate::ingest::diff::compute_diff(&to_keys(&previous), &to_keys(&current));
    Ok(Json(diff))
}

#[instrument(skip(state))]
pub async fn list_vulnerabilities(
    State(state): State<AppState>,
    Query(query): Query<ListVulnerabilitiesQuery>,
) -> Result<Json<Paged<crate::store::types::VulnerabilityWithImage>>> {
    let paging = Paging {
        limit: query.limit.unwrap_or(50).clamp(1, 500),
        offset: query.offset.unwrap_or(0).max(0),
    };
    let filters = VulnerabilityFilters {
        severity: query.severity,
        status: query.status,
        has_fix: query.has_fix,
        image_id: query.image_id,
        image_name: query.image,
        cve_id: query.cve_id,
    };
    let (data, total) = state
        .repos
        .vulnerabilities
        .list_with_image_info(paging, filters)
        .await?;
    Ok(Json(Paged {
        data,
        total,
        limit: paging.limit,
        offset: paging.offset,
    }))
}

#[instrument(skip(state))]
pub async fn get_vulnerability_by_cve(
    State(state): State<AppState>,
    Path(cve_id): Path<String>,
) -> Result<Json<Vec<crate::store::types::Vulnerability>>> {
    let rows = state.repos.vulnerabilities.get_by_cve(&cve_id).await?;
    if rows.is_empty() {
        return Err(Error::NotFound(format!("vulnerability {cve_id}")));
    }
    Ok(Json(rows))
}

#[instrument(skip(state, headers, body))]
pub async fn patch_vulnerability(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<PatchVulnerabilityRequest>,
) -> Result<Json<crate::store::types::Vulnerability>> {
    let changed_by = resolve_identity(&state, &headers).await?;
    let ctx = UpdateContext {
        changed_by,
        status: body.status,
        notes: body.notes,
    };
    let updated = state.lifecycle.update_one(id, ctx).await?;
    Ok(Json(updated))
}

#[instrument(skip(state, headers, body))]
pub async fn bulk_patch_vulnerabilities(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<BulkPatchRequest>,
) -> Result<Json<BulkPatchResponse>> {
    let changed_by = resolve_identity(&state, &headers).await?;
    let status = body.status;
    let ctx = UpdateContext {
        changed_by,
        status,
        notes: body.notes,
    };
    let updated = state.lifecycle.bulk_update(body.ids, ctx).await?;
    Ok(Json(BulkPatchResponse {
        updated_count: updated.len(),
        status,
    }))
}

#[instrument(skip(state))]
pub async fn get_vulnerability_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<crate::store::types::VulnerabilityHistoryEntry>>> {
    Ok(Json(state.repos.vulnerabilities.get_history(id).await?))
}

#[instrument(skip(state))]
pub async fn list_images(
    State(state): State<AppState>,
    Query(query): Query<ListImagesQuery>,
) -> Result<Json<Paged<crate::store::types::Image>>> {
    let paging = Paging {
        limit: query.limit.unwrap_or(50).clamp(1, 500),
        offset: query.offset.unwrap_or(0).max(0),
    };
    let filters = ImageFilters {
        registry: query.registry,
        repository: query.repository,
        tag: query.tag,
        has_fix: query.has_fix,
    };
    let (data, total) = state.repos.images.list(paging, filters).await?;
    Ok(Json(Paged {
        data,
        total,
        limit: paging.limit,
        offset: paging.offset,
    }))
}

#[instrument(skip(state))]
pub async fn image_scan_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ImageHistoryQuery>,
) -> Result<Json<Paged<crate::store::types::Scan>>> {
    let paging = Paging {
        limit: query.limit.unwrap_or(50).clamp(1, 500),
        offset: query.offset.unwrap_or(0).max(0),
    };
    let (data, total) = state
        .repos
        .images
        .scan_history(id, paging, query.has_fix)
        .await?;
    Ok(Json(Paged {
        data,
        total,
        limit: paging.limit,
        offset: paging.offset,
    }))
}

#[instrument(skip(state))]
pub async fn dashboard_metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<DashboardMetrics>> {
    let (_, total_images) = state
        .repos
        .images
        .list(Paging { limit: 1, offset: 0 }, ImageFilters::default())
        .await?;
    let (_, total_scans) = state
        .repos
        .scans
        .list(Paging { limit: 1, offset: 0 }, ScanFilters::default())
        .await?;
    let counts = state
        .repos
        .vulnerabilities
        .open_severity_breakdown(query.has_fix, query.image_name.as_deref())
        .await?;

    Ok(Json(DashboardMetrics {
        total_images,
        total_scans,
        open_vulnerabilities: counts.critical + counts.high + counts.medium + counts.low + counts.unknown,
        critical: counts.critical,
        high: counts.high,
        medium: counts.medium,
        low: counts.low,
        unknown: counts.unknown,
    }))
}

#[instrument(skip(state, headers, body))]
pub async fn put_webhook_config(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<WebhookConfigRequest>,
) -> Result<StatusCode> {
    resolve_identity(&state, &headers).await?;

    let cfg = WebhookConfig {
        namespace,
        name,
        url: body.url,
        format: body.format,
        scan_completion_enabled: body.scan_completion_enabled,
        scan_completion_min_severity: body.scan_completion_min_severity,
        scan_completion_only_fixable: body.scan_completion_only_fixable,
        status_change_enabled: body.status_change_enabled,
        status_change_min_severity: body.status_change_min_severity,
        status_change_only_fixable: body.status_change_only_fixable,
        status_change_transitions: body.status_change_transitions,
        status_change_include_note_changes: body.status_change_include_note_changes,
    };
    state.repos.webhook_configs.upsert(cfg).await?;
    Ok(StatusCode::OK)
}

#[instrument(skip(state))]
pub async fn get_webhook_config(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<WebhookConfig>> {
    let cfg = state
        .repos
        .webhook_configs
        .get(&namespace, &name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("webhook config {namespace}/{name}")))?;
    Ok(Json(cfg))
}

#[instrument(skip(state, headers))]
pub async fn delete_webhook_config(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    resolve_identity(&state, &headers).await?;
    state.repos.webhook_configs.delete(&namespace, &name).await?;
    Ok(StatusCode::OK)
}
