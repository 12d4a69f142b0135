//! Superadmin Stripe sync routes
//!
//! GET runs the read-only analysis; POST applies fixes and records the
//! caller as the audit actor.

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use uuid::Uuid;
use waveorder_billing::{FixResult, SyncReport};

use crate::{
    auth::AuthUser,
    error::ApiResult,
    state::AppState,
};

pub async fn analyze(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(business_id): Path<Uuid>,
) -> ApiResult<Json<SyncReport>> {
    auth_user.require_superadmin()?;
    let billing = state.billing()?;

    let report = billing.reconciler.analyze(business_id).await?;

    tracing::info!(
        business_id = %business_id,
        admin_id = %auth_user.user_id,
        status = report.status.as_str(),
        issues = report.issues.len(),
        "Stripe sync analyzed"
    );

    Ok(Json(report))
}

pub async fn fix(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(business_id): Path<Uuid>,
) -> ApiResult<Json<FixResult>> {
    auth_user.require_superadmin()?;
    let billing = state.billing()?;

    let result = billing
        .reconciler
        .fix(business_id, Some(auth_user.user_id))
        .await?;

    tracing::info!(
        business_id = %business_id,
        admin_id = %auth_user.user_id,
        applied = result.fixes_applied,
        failed = result.fixes_failed,
        skipped = result.fixes_skipped,
        "Stripe sync fix completed"
    );

    Ok(Json(result))
}
