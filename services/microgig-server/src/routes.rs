//! Route table and handlers.
//!
//! Successful mutations return the updated entity as JSON. Cron and
//! cleanup endpoints register both GET and POST with identical semantics:
//! the sweeps are idempotent and some schedulers can only issue GETs.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use microgig_cron::{CronRunReport, DryRunReport, SweepReport};
use microgig_types::{
    BalanceView, CoreError, FeeSettings, FeeSettingsUpdate, FeeType, Job, JobId, LedgerEntry,
    Reservation, ReservationId, ReservationViolation, ReviewPolicy, UserId, WorkProof, WorkProofId,
};

use crate::auth::{AdminAuth, AuthUser, CronAuth};
use crate::error::ApiError;
use crate::state::AppState;

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Default retention before cleanup purges terminal reservation rows
const DEFAULT_CLEANUP_RETENTION_SECS: i64 = 7 * 24 * 3600;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        // Jobs
        .route("/api/jobs", get(list_jobs).post(create_job))
        .route("/api/jobs/reserve", post(reserve_job))
        // Reservations
        .route("/api/reservations/cancel", post(cancel_reservation))
        .route("/api/reservations/check-expiry", post(check_expiry))
        .route(
            "/api/reservations/cleanup",
            get(cleanup_reservations).post(cleanup_reservations),
        )
        .route("/api/reservations/user", get(user_reservations))
        // Work proofs
        .route("/api/work-proofs/submit", post(submit_proof))
        .route("/api/work-proofs/approve", post(approve_proof))
        .route("/api/work-proofs/reject", post(reject_proof))
        .route("/api/work-proofs/request-revision", post(request_revision))
        // Wallet
        .route("/api/wallet/:user_id", get(wallet_balance))
        .route("/api/wallet/:user_id/transactions", get(wallet_transactions))
        .route("/api/wallet/:user_id/deposit", post(wallet_deposit))
        .route("/api/wallet/:user_id/withdrawal", post(wallet_withdrawal))
        .route("/api/wallet/:user_id/earnings", post(wallet_earnings))
        .route("/api/wallet/:user_id/validate-tip", post(validate_tip))
        .route("/api/wallet/process-tip", post(process_tip))
        // Admin
        .route("/api/admin/wallet/fee-settings", get(all_fee_settings))
        .route(
            "/api/admin/wallet/fee-settings/:fee_type",
            get(get_fee_settings).put(update_fee_settings),
        )
        .route(
            "/api/admin/reservation-violations",
            get(list_violations).delete(clear_violations),
        )
        .route(
            "/api/admin/review-policy",
            get(get_review_policy).post(update_review_policy),
        )
        // Cron
        .route(
            "/api/cron/expire-reservations",
            get(cron_expire).post(cron_expire),
        )
        .route(
            "/api/cron/process-work-proof-timeouts",
            get(cron_timeouts).post(cron_timeouts),
        )
        .route("/api/manual-cron-trigger", post(manual_cron_trigger))
        // Diagnostics
        .route("/api/test-cron", get(test_cron))
        .route("/api/test-cron-now", get(test_cron).post(test_cron))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "microgig-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ============================================================================
// Jobs
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateJobRequest {
    poster_id: UserId,
    title: String,
    payout: Decimal,
}

async fn create_job(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Json(req): Json<CreateJobRequest>,
) -> ApiResult<Job> {
    if req.title.trim().is_empty() {
        return Err(CoreError::invalid_input("title", "must not be empty").into());
    }
    let job = state
        .reservations
        .create_job(req.poster_id, req.title, req.payout)
        .await?;
    Ok(Json(job))
}

async fn list_jobs(State(state): State<Arc<AppState>>, _user: AuthUser) -> ApiResult<Vec<Job>> {
    Ok(Json(state.reservations.jobs().await))
}

#[derive(Debug, Deserialize)]
struct ReserveRequest {
    job_id: JobId,
}

async fn reserve_job(
    State(state): State<Arc<AppState>>,
    AuthUser(worker): AuthUser,
    Json(req): Json<ReserveRequest>,
) -> ApiResult<Reservation> {
    let reservation = state.reservations.reserve(&req.job_id, &worker).await?;
    Ok(Json(reservation))
}

// ============================================================================
// Reservations
// ============================================================================

#[derive(Debug, Deserialize)]
struct CancelRequest {
    reservation_id: ReservationId,
    reason: Option<String>,
}

async fn cancel_reservation(
    State(state): State<Arc<AppState>>,
    AuthUser(worker): AuthUser,
    Json(req): Json<CancelRequest>,
) -> ApiResult<Reservation> {
    let reservation = state
        .reservations
        .cancel(&req.reservation_id, &worker, req.reason)
        .await?;
    Ok(Json(reservation))
}

#[derive(Debug, Deserialize)]
struct CheckExpiryRequest {
    reservation_id: ReservationId,
}

async fn check_expiry(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Json(req): Json<CheckExpiryRequest>,
) -> ApiResult<Value> {
    let expired = state.reservations.check_expiry(&req.reservation_id).await?;
    Ok(Json(json!({
        "reservation_id": req.reservation_id,
        "expired": expired,
    })))
}

#[derive(Debug, Deserialize)]
struct CleanupParams {
    /// Retention window override, in seconds
    older_than_secs: Option<i64>,
}

async fn cleanup_reservations(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Query(params): Query<CleanupParams>,
) -> ApiResult<Value> {
    let retention = Duration::seconds(
        params
            .older_than_secs
            .unwrap_or(DEFAULT_CLEANUP_RETENTION_SECS),
    );
    let purged = state.reservations.cleanup(retention).await?;
    Ok(Json(json!({ "purged": purged })))
}

async fn user_reservations(
    State(state): State<Arc<AppState>>,
    AuthUser(worker): AuthUser,
) -> ApiResult<Vec<Reservation>> {
    Ok(Json(state.reservations.active_for_worker(&worker).await))
}

// ============================================================================
// Work proofs
// ============================================================================

#[derive(Debug, Deserialize)]
struct SubmitProofRequest {
    reservation_id: ReservationId,
}

async fn submit_proof(
    State(state): State<Arc<AppState>>,
    AuthUser(worker): AuthUser,
    Json(req): Json<SubmitProofRequest>,
) -> ApiResult<WorkProof> {
    let proof = state.proofs.submit(&req.reservation_id, &worker).await?;
    Ok(Json(proof))
}

#[derive(Debug, Deserialize)]
struct ApproveRequest {
    proof_id: WorkProofId,
}

async fn approve_proof(
    State(state): State<Arc<AppState>>,
    AuthUser(reviewer): AuthUser,
    Json(req): Json<ApproveRequest>,
) -> ApiResult<WorkProof> {
    let proof = state.proofs.approve(&req.proof_id, &reviewer).await?;
    Ok(Json(proof))
}

#[derive(Debug, Deserialize)]
struct ReviewRequest {
    proof_id: WorkProofId,
    reason: String,
}

async fn reject_proof(
    State(state): State<Arc<AppState>>,
    AuthUser(reviewer): AuthUser,
    Json(req): Json<ReviewRequest>,
) -> ApiResult<WorkProof> {
    let proof = state
        .proofs
        .reject(&req.proof_id, &reviewer, req.reason)
        .await?;
    Ok(Json(proof))
}

async fn request_revision(
    State(state): State<Arc<AppState>>,
    AuthUser(reviewer): AuthUser,
    Json(req): Json<ReviewRequest>,
) -> ApiResult<WorkProof> {
    let proof = state
        .proofs
        .request_revision(&req.proof_id, &reviewer, req.reason)
        .await?;
    Ok(Json(proof))
}

// ============================================================================
// Wallet
// ============================================================================

/// Wallet routes act on the authenticated user's own account only
fn require_self(caller: &UserId, target: &UserId) -> Result<(), ApiError> {
    if caller != target {
        return Err(CoreError::unauthorized("wallet access is limited to the account owner").into());
    }
    Ok(())
}

async fn wallet_balance(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(user_id): Path<UserId>,
) -> ApiResult<BalanceView> {
    require_self(&caller, &user_id)?;
    Ok(Json(state.wallet.balance(&user_id).await))
}

async fn wallet_transactions(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(user_id): Path<UserId>,
) -> ApiResult<Vec<LedgerEntry>> {
    require_self(&caller, &user_id)?;
    Ok(Json(state.wallet.transactions(&user_id).await))
}

#[derive(Debug, Deserialize)]
struct AmountRequest {
    amount: Decimal,
}

async fn wallet_deposit(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(user_id): Path<UserId>,
    Json(req): Json<AmountRequest>,
) -> ApiResult<LedgerEntry> {
    require_self(&caller, &user_id)?;
    let entry = state.wallet.deposit(&user_id, req.amount).await?;
    Ok(Json(entry))
}

async fn wallet_withdrawal(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(user_id): Path<UserId>,
    Json(req): Json<AmountRequest>,
) -> ApiResult<LedgerEntry> {
    require_self(&caller, &user_id)?;
    let entry = state.wallet.withdraw(&user_id, req.amount).await?;
    Ok(Json(entry))
}

#[derive(Debug, Deserialize)]
struct EarningsRequest {
    amount: Decimal,
    reference: String,
    description: Option<String>,
}

/// Internal settlement path; requires the admin token rather than the
/// account owner's token
async fn wallet_earnings(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Path(user_id): Path<UserId>,
    Json(req): Json<EarningsRequest>,
) -> ApiResult<LedgerEntry> {
    let description = req
        .description
        .unwrap_or_else(|| "Manual earnings adjustment".to_string());
    let entry = state
        .wallet
        .add_earnings(&user_id, req.amount, &req.reference, description)
        .await?;
    Ok(Json(entry))
}

async fn validate_tip(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(user_id): Path<UserId>,
    Json(req): Json<AmountRequest>,
) -> ApiResult<Value> {
    require_self(&caller, &user_id)?;
    state.wallet.validate_tip_balance(&user_id, req.amount).await?;
    Ok(Json(json!({ "valid": true })))
}

#[derive(Debug, Deserialize)]
struct TipRequest {
    to_user_id: UserId,
    amount: Decimal,
    reference: Option<String>,
    description: Option<String>,
}

async fn process_tip(
    State(state): State<Arc<AppState>>,
    AuthUser(from): AuthUser,
    Json(req): Json<TipRequest>,
) -> ApiResult<Vec<LedgerEntry>> {
    let reference = req
        .reference
        .unwrap_or_else(|| format!("tip_{}", Uuid::new_v4()));
    let description = req.description.unwrap_or_else(|| "Tip".to_string());
    let entries = state
        .wallet
        .process_tip(&from, &req.to_user_id, req.amount, &reference, description)
        .await?;
    Ok(Json(entries))
}

// ============================================================================
// Admin
// ============================================================================

async fn all_fee_settings(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
) -> ApiResult<Vec<FeeSettings>> {
    Ok(Json(state.wallet.fees().all()))
}

fn parse_fee_type(raw: &str) -> Result<FeeType, ApiError> {
    raw.parse::<FeeType>().map_err(|_| {
        ApiError::from(CoreError::FeeSettingsNotFound {
            fee_type: raw.to_string(),
        })
    })
}

async fn get_fee_settings(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Path(fee_type): Path<String>,
) -> ApiResult<FeeSettings> {
    let fee_type = parse_fee_type(&fee_type)?;
    Ok(Json(state.wallet.fee_settings(fee_type)))
}

async fn update_fee_settings(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Path(fee_type): Path<String>,
    Json(update): Json<FeeSettingsUpdate>,
) -> ApiResult<FeeSettings> {
    let fee_type = parse_fee_type(&fee_type)?;
    Ok(Json(state.wallet.update_fee_settings(fee_type, &update)))
}

async fn list_violations(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
) -> ApiResult<Vec<ReservationViolation>> {
    Ok(Json(state.reservations.violations().await))
}

async fn clear_violations(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
) -> ApiResult<Value> {
    let cleared = state.reservations.clear_violations().await;
    Ok(Json(json!({ "cleared": cleared })))
}

async fn get_review_policy(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
) -> ApiResult<ReviewPolicy> {
    Ok(Json(state.proofs.policy()))
}

async fn update_review_policy(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Json(policy): Json<ReviewPolicy>,
) -> ApiResult<ReviewPolicy> {
    state.proofs.set_policy(policy);
    Ok(Json(state.proofs.policy()))
}

// ============================================================================
// Cron
// ============================================================================

#[derive(Debug, Serialize)]
struct SweepResponse {
    report: SweepReport,
}

async fn cron_expire(
    State(state): State<Arc<AppState>>,
    _cron: CronAuth,
) -> ApiResult<SweepResponse> {
    let report = state.cron.expire_reservations().await;
    Ok(Json(SweepResponse { report }))
}

async fn cron_timeouts(
    State(state): State<Arc<AppState>>,
    _cron: CronAuth,
) -> ApiResult<SweepResponse> {
    let report = state.cron.process_work_proof_timeouts().await;
    Ok(Json(SweepResponse { report }))
}

async fn manual_cron_trigger(
    State(state): State<Arc<AppState>>,
    _cron: CronAuth,
) -> ApiResult<CronRunReport> {
    Ok(Json(state.cron.run_all().await))
}

/// Dry run: reports what the sweeps would touch, mutating nothing
async fn test_cron(State(state): State<Arc<AppState>>) -> ApiResult<DryRunReport> {
    Ok(Json(state.cron.dry_run().await))
}
