use crate::db::DbConnection;
use crate::domain::{
    ContributionService, GroupService, LoanService, MemberService, PenaltyService, ProfitService,
    ReportService,
};
use crate::error::LedgerResult;
use crate::settings::SettingsService;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{Local, NaiveDate};
use shared::{
    CreateContributionRequest, CreateGroupRequest, CreateLoanRequest, CreateMemberRequest,
    CreatePenaltyRequest, CreateRepaymentRequest, DistributionRequest, JamiiDeductionRequest,
    PenaltyPaymentRequest, UpdateContributionRequest, UpdateLoanRequest, UpdateMemberRequest,
    UpdatePenaltyRequest,
};
use std::collections::HashMap;
use tracing::info;

/// Application state holding every ledger service.
#[derive(Clone)]
pub struct AppState {
    pub groups: GroupService,
    pub members: MemberService,
    pub contributions: ContributionService,
    pub loans: LoanService,
    pub penalties: PenaltyService,
    pub profit: ProfitService,
    pub reports: ReportService,
    pub settings: SettingsService,
}

impl AppState {
    pub fn new(db: DbConnection) -> Self {
        Self {
            groups: GroupService::new(db.clone()),
            members: MemberService::new(db.clone()),
            contributions: ContributionService::new(db.clone()),
            loans: LoanService::new(db.clone()),
            penalties: PenaltyService::new(db.clone()),
            profit: ProfitService::new(db.clone()),
            reports: ReportService::new(db.clone()),
            settings: SettingsService::new(db),
        }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// All ledger routes, nested under `/api` by the caller.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/groups", post(create_group))
        .route("/groups/:group_id/settings", get(get_settings).put(save_settings))
        .route("/groups/:group_id/members", get(list_members).post(create_member))
        .route(
            "/groups/:group_id/members/:member_id",
            put(update_member).delete(delete_member),
        )
        .route("/groups/:group_id/members/:member_id/statement", get(member_statement))
        .route(
            "/groups/:group_id/contributions",
            get(list_contributions).post(record_contribution),
        )
        .route(
            "/groups/:group_id/contributions/:contribution_id",
            put(update_contribution).delete(delete_contribution),
        )
        .route("/groups/:group_id/jamii-deductions", post(record_jamii_deduction))
        .route("/groups/:group_id/loans", get(list_loans).post(create_loan))
        .route("/groups/:group_id/loans/:loan_id", put(update_loan))
        .route("/groups/:group_id/loans/:loan_id/repayments", get(list_repayments))
        .route("/groups/:group_id/repayments", post(record_repayment))
        .route("/groups/:group_id/penalties", get(list_penalties).post(create_penalty))
        .route(
            "/groups/:group_id/penalties/:penalty_id",
            put(update_penalty).delete(delete_penalty),
        )
        .route("/groups/:group_id/penalties/:penalty_id/payments", post(record_penalty_payment))
        .route("/groups/:group_id/profit", get(group_profit))
        .route("/groups/:group_id/distribution", post(distribute_profits))
        .route("/groups/:group_id/dashboard", get(dashboard))
}

pub async fn create_group(
    State(state): State<AppState>,
    Json(request): Json<CreateGroupRequest>,
) -> LedgerResult<impl IntoResponse> {
    info!("POST /api/groups - name: {}", request.name);
    let group_id = state.groups.create_group(&request.name, today()).await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "group_id": group_id }))))
}

pub async fn get_settings(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
) -> LedgerResult<impl IntoResponse> {
    info!("GET /api/groups/{}/settings", group_id);
    let raw = state.settings.resolve_raw(group_id).await?;
    Ok(Json(raw))
}

pub async fn save_settings(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
    Json(updates): Json<HashMap<String, String>>,
) -> LedgerResult<impl IntoResponse> {
    info!("PUT /api/groups/{}/settings - {} keys", group_id, updates.len());
    state.settings.save(group_id, &updates).await?;
    // Re-resolve so malformed overrides surface immediately, not on the
    // next unrelated read.
    state.settings.resolve(group_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_members(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
) -> LedgerResult<impl IntoResponse> {
    info!("GET /api/groups/{}/members", group_id);
    let settings = state.settings.resolve(group_id).await?;
    let summaries = state.reports.member_summaries(group_id, &settings, today()).await?;
    Ok(Json(summaries))
}

pub async fn create_member(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
    Json(request): Json<CreateMemberRequest>,
) -> LedgerResult<impl IntoResponse> {
    info!("POST /api/groups/{}/members - name: {}", group_id, request.name);
    let member = state.members.create_member(group_id, request, today()).await?;
    Ok((StatusCode::CREATED, Json(member)))
}

pub async fn update_member(
    State(state): State<AppState>,
    Path((group_id, member_id)): Path<(i64, i64)>,
    Json(request): Json<UpdateMemberRequest>,
) -> LedgerResult<impl IntoResponse> {
    info!("PUT /api/groups/{}/members/{}", group_id, member_id);
    let member = state.members.update_member(group_id, member_id, request).await?;
    Ok(Json(member))
}

pub async fn delete_member(
    State(state): State<AppState>,
    Path((group_id, member_id)): Path<(i64, i64)>,
) -> LedgerResult<impl IntoResponse> {
    info!("DELETE /api/groups/{}/members/{}", group_id, member_id);
    state.members.delete_member(group_id, member_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn member_statement(
    State(state): State<AppState>,
    Path((group_id, member_id)): Path<(i64, i64)>,
) -> LedgerResult<impl IntoResponse> {
    info!("GET /api/groups/{}/members/{}/statement", group_id, member_id);
    let settings = state.settings.resolve(group_id).await?;
    let statement = state
        .reports
        .member_statement(group_id, member_id, &settings, today())
        .await?;
    Ok(Json(statement))
}

pub async fn list_contributions(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
) -> LedgerResult<impl IntoResponse> {
    info!("GET /api/groups/{}/contributions", group_id);
    let list = state.contributions.list_contributions(group_id).await?;
    Ok(Json(list))
}

pub async fn record_contribution(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
    Json(request): Json<CreateContributionRequest>,
) -> LedgerResult<impl IntoResponse> {
    info!(
        "POST /api/groups/{}/contributions - member {} {} {}",
        group_id, request.member_id, request.kind, request.amount
    );
    let recorded = state.contributions.record_contribution(group_id, request, today()).await?;
    match recorded {
        crate::domain::contribution_service::RecordedContribution::Saved(c) => {
            Ok((StatusCode::CREATED, Json(serde_json::json!({ "contribution": c }))))
        }
        crate::domain::contribution_service::RecordedContribution::RoutedToLoan { status } => Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({ "routed_to_loan": true, "loan_status": status })),
        )),
    }
}

pub async fn update_contribution(
    State(state): State<AppState>,
    Path((group_id, contribution_id)): Path<(i64, i64)>,
    Json(request): Json<UpdateContributionRequest>,
) -> LedgerResult<impl IntoResponse> {
    info!("PUT /api/groups/{}/contributions/{}", group_id, contribution_id);
    let contribution = state
        .contributions
        .update_contribution(group_id, contribution_id, request)
        .await?;
    Ok(Json(contribution))
}

pub async fn delete_contribution(
    State(state): State<AppState>,
    Path((group_id, contribution_id)): Path<(i64, i64)>,
) -> LedgerResult<impl IntoResponse> {
    info!("DELETE /api/groups/{}/contributions/{}", group_id, contribution_id);
    state.contributions.delete_contribution(group_id, contribution_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn record_jamii_deduction(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
    Json(request): Json<JamiiDeductionRequest>,
) -> LedgerResult<impl IntoResponse> {
    info!("POST /api/groups/{}/jamii-deductions - {}", group_id, request.amount);
    let contribution = state
        .contributions
        .record_jamii_deduction(group_id, request.amount, today())
        .await?;
    Ok((StatusCode::CREATED, Json(contribution)))
}

/// Listing loans is a mutating read: overdue loans are swept for lateness
/// penalties before the list is assembled.
pub async fn list_loans(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
) -> LedgerResult<impl IntoResponse> {
    info!("GET /api/groups/{}/loans", group_id);
    let settings = state.settings.resolve(group_id).await?;
    let now = today();
    state
        .penalties
        .auto_insert_loan_penalties(group_id, settings.daily_penalty, now)
        .await?;
    let loans = state.loans.list_loans(group_id, now).await?;
    Ok(Json(loans))
}

pub async fn create_loan(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
    Json(request): Json<CreateLoanRequest>,
) -> LedgerResult<impl IntoResponse> {
    info!(
        "POST /api/groups/{}/loans - member {} principal {}",
        group_id, request.member_id, request.principal
    );
    let settings = state.settings.resolve(group_id).await?;
    let loan = state
        .loans
        .create_loan(group_id, request.member_id, request.principal, &settings, today())
        .await?;
    Ok((StatusCode::CREATED, Json(loan)))
}

pub async fn update_loan(
    State(state): State<AppState>,
    Path((group_id, loan_id)): Path<(i64, i64)>,
    Json(request): Json<UpdateLoanRequest>,
) -> LedgerResult<impl IntoResponse> {
    info!("PUT /api/groups/{}/loans/{}", group_id, loan_id);
    let loan = state.loans.update_loan(group_id, loan_id, request).await?;
    Ok(Json(loan))
}

pub async fn list_repayments(
    State(state): State<AppState>,
    Path((group_id, loan_id)): Path<(i64, i64)>,
) -> LedgerResult<impl IntoResponse> {
    info!("GET /api/groups/{}/loans/{}/repayments", group_id, loan_id);
    let repayments = state.loans.list_repayments(group_id, loan_id).await?;
    Ok(Json(repayments))
}

pub async fn record_repayment(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
    Json(request): Json<CreateRepaymentRequest>,
) -> LedgerResult<impl IntoResponse> {
    info!(
        "POST /api/groups/{}/repayments - loan {} amount {}",
        group_id, request.loan_id, request.amount
    );
    let status = state
        .loans
        .record_repayment(group_id, request.loan_id, request.amount, today())
        .await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "loan_status": status }))))
}

pub async fn list_penalties(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
) -> LedgerResult<impl IntoResponse> {
    info!("GET /api/groups/{}/penalties", group_id);
    let settings = state.settings.resolve(group_id).await?;
    state
        .penalties
        .auto_insert_loan_penalties(group_id, settings.daily_penalty, today())
        .await?;
    let ledger = state.penalties.list_penalties(group_id).await?;
    Ok(Json(ledger))
}

pub async fn create_penalty(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
    Json(request): Json<CreatePenaltyRequest>,
) -> LedgerResult<impl IntoResponse> {
    info!(
        "POST /api/groups/{}/penalties - member {} {} {}",
        group_id, request.member_id, request.penalty_type, request.amount
    );
    let penalty = state.penalties.create_penalty(group_id, request, today()).await?;
    Ok((StatusCode::CREATED, Json(penalty)))
}

pub async fn update_penalty(
    State(state): State<AppState>,
    Path((group_id, penalty_id)): Path<(i64, i64)>,
    Json(request): Json<UpdatePenaltyRequest>,
) -> LedgerResult<impl IntoResponse> {
    info!("PUT /api/groups/{}/penalties/{}", group_id, penalty_id);
    let penalty = state.penalties.update_penalty(group_id, penalty_id, request).await?;
    Ok(Json(penalty))
}

pub async fn delete_penalty(
    State(state): State<AppState>,
    Path((group_id, penalty_id)): Path<(i64, i64)>,
) -> LedgerResult<impl IntoResponse> {
    info!("DELETE /api/groups/{}/penalties/{}", group_id, penalty_id);
    state.penalties.delete_penalty(group_id, penalty_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn record_penalty_payment(
    State(state): State<AppState>,
    Path((group_id, penalty_id)): Path<(i64, i64)>,
    Json(request): Json<PenaltyPaymentRequest>,
) -> LedgerResult<impl IntoResponse> {
    info!(
        "POST /api/groups/{}/penalties/{}/payments - {}",
        group_id, penalty_id, request.amount
    );
    let receipt = state
        .penalties
        .record_payment(group_id, penalty_id, request.amount, today())
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn group_profit(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
) -> LedgerResult<impl IntoResponse> {
    info!("GET /api/groups/{}/profit", group_id);
    let settings = state.settings.resolve(group_id).await?;
    let profit = state.profit.current_group_profit(group_id, &settings).await?;
    Ok(Json(profit))
}

pub async fn distribute_profits(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
    Json(request): Json<DistributionRequest>,
) -> LedgerResult<impl IntoResponse> {
    info!(
        "POST /api/groups/{}/distribution - proposed expense {}",
        group_id, request.proposed_jamii_expense
    );
    if request.proposed_jamii_expense < 0.0 {
        return Err(crate::error::LedgerError::validation(
            "proposed jamii expense cannot be negative",
        ));
    }
    let settings = state.settings.resolve(group_id).await?;
    let report = state
        .reports
        .distribute_profits(group_id, &settings, request.proposed_jamii_expense, today())
        .await?;
    Ok(Json(report))
}

/// The dashboard is also a mutating read; the sweep happens inside the
/// report service.
pub async fn dashboard(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
) -> LedgerResult<impl IntoResponse> {
    info!("GET /api/groups/{}/dashboard", group_id);
    let settings = state.settings.resolve(group_id).await?;
    let summary = state.reports.dashboard(group_id, &settings, today()).await?;
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::Response;

    async fn setup() -> (AppState, i64) {
        let db = DbConnection::init_test().await.expect("init test db");
        let state = AppState::new(db);
        let group_id = state
            .groups
            .create_group("Handler Test", today())
            .await
            .expect("create group");
        (state, group_id)
    }

    fn status_of(response: Response) -> StatusCode {
        response.status()
    }

    #[tokio::test]
    async fn member_handlers_round_trip() {
        let (state, group_id) = setup().await;

        let response = create_member(
            State(state.clone()),
            Path(group_id),
            Json(CreateMemberRequest { name: "Asha".to_string(), phone: None }),
        )
        .await
        .unwrap()
        .into_response();
        assert_eq!(status_of(response), StatusCode::CREATED);

        let response = list_members(State(state), Path(group_id))
            .await
            .unwrap()
            .into_response();
        assert_eq!(status_of(response), StatusCode::OK);
    }

    #[tokio::test]
    async fn validation_errors_surface_as_bad_request() {
        let (state, group_id) = setup().await;

        let err = create_member(
            State(state.clone()),
            Path(group_id),
            Json(CreateMemberRequest { name: "  ".to_string(), phone: None }),
        )
        .await
        .err().expect("expected an error");
        assert_eq!(status_of(err.into_response()), StatusCode::BAD_REQUEST);

        let err = create_loan(
            State(state),
            Path(group_id),
            Json(CreateLoanRequest { member_id: 999, principal: 100_000.0 }),
        )
        .await
        .err().expect("expected an error");
        assert_eq!(status_of(err.into_response()), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn loan_flow_through_handlers() {
        let (state, group_id) = setup().await;

        let member = state
            .members
            .create_member(
                group_id,
                CreateMemberRequest { name: "Juma".to_string(), phone: None },
                today(),
            )
            .await
            .unwrap();

        let response = create_loan(
            State(state.clone()),
            Path(group_id),
            Json(CreateLoanRequest { member_id: member.id, principal: 500_000.0 }),
        )
        .await
        .unwrap()
        .into_response();
        assert_eq!(status_of(response), StatusCode::CREATED);

        let response = list_loans(State(state.clone()), Path(group_id))
            .await
            .unwrap()
            .into_response();
        assert_eq!(status_of(response), StatusCode::OK);

        let response = dashboard(State(state), Path(group_id))
            .await
            .unwrap()
            .into_response();
        assert_eq!(status_of(response), StatusCode::OK);
    }

    #[tokio::test]
    async fn settings_round_trip_rejects_malformed_values() {
        let (state, group_id) = setup().await;

        let mut updates = HashMap::new();
        updates.insert("interest_rate".to_string(), "0.12".to_string());
        let response = save_settings(State(state.clone()), Path(group_id), Json(updates))
            .await
            .unwrap()
            .into_response();
        assert_eq!(status_of(response), StatusCode::NO_CONTENT);

        let mut updates = HashMap::new();
        updates.insert("interest_rate".to_string(), "lots".to_string());
        let err = save_settings(State(state), Path(group_id), Json(updates))
            .await
            .err().expect("expected an error");
        assert_eq!(status_of(err.into_response()), StatusCode::BAD_REQUEST);
    }
}
