use crate::db::DbConnection;
use crate::domain::loan_service::LoanService;
use crate::domain::member_service::MemberService;
use crate::error::{LedgerError, LedgerResult};
use chrono::NaiveDate;
use shared::{
    Contribution, ContributionKind, ContributionView, CreateContributionRequest,
    UpdateContributionRequest,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;

/// Contribution kind names an operator may record directly.
const OPERATOR_KINDS: &[ContributionKind] = &[
    ContributionKind::Hisa,
    ContributionKind::HisaAnzia,
    ContributionKind::Jamii,
];

fn contribution_from_row(row: &SqliteRow) -> LedgerResult<Contribution> {
    let kind: String = row.get("type");
    Ok(Contribution {
        id: row.get("id"),
        group_id: row.get("group_id"),
        member_id: row.get("member_id"),
        kind: kind
            .parse::<ContributionKind>()
            .map_err(LedgerError::Validation)?,
        amount: row.get("amount"),
        date: row.get("date"),
    })
}

fn parse_operator_kind(raw: &str) -> LedgerResult<ContributionKind> {
    let kind = raw
        .trim()
        .parse::<ContributionKind>()
        .map_err(LedgerError::Validation)?;
    if !OPERATOR_KINDS.contains(&kind) {
        return Err(LedgerError::validation(format!(
            "contribution type `{}` is system-generated and cannot be recorded directly",
            kind
        )));
    }
    Ok(kind)
}

/// Outcome of recording a contribution: either a ledger row, or the amount
/// was routed to a loan as a repayment ("rejesho").
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedContribution {
    Saved(Contribution),
    RoutedToLoan { status: shared::LoanStatus },
}

/// Contribution ledger: hisa, hisa anzia and jamii records, plus the
/// system-generated rows that only other engines may write.
#[derive(Clone)]
pub struct ContributionService {
    db: DbConnection,
    members: MemberService,
    loans: LoanService,
}

impl ContributionService {
    pub fn new(db: DbConnection) -> Self {
        let members = MemberService::new(db.clone());
        let loans = LoanService::new(db.clone());
        Self { db, members, loans }
    }

    pub async fn get_contribution(
        &self,
        group_id: i64,
        contribution_id: i64,
    ) -> LedgerResult<Contribution> {
        let row = sqlx::query("SELECT * FROM contributions WHERE id = ? AND group_id = ?")
            .bind(contribution_id)
            .bind(group_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(LedgerError::NotFound("contribution"))?;
        contribution_from_row(&row)
    }

    pub async fn list_contributions(&self, group_id: i64) -> LedgerResult<Vec<ContributionView>> {
        let rows = sqlx::query(
            r#"
            SELECT c.*, m.name AS member_name
            FROM contributions c
            JOIN members m ON c.member_id = m.id
            WHERE c.group_id = ?
            ORDER BY c.date DESC, c.id DESC
            "#,
        )
        .bind(group_id)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let kind: String = row.get("type");
                Ok(ContributionView {
                    id: row.get("id"),
                    member_id: row.get("member_id"),
                    member_name: row.get("member_name"),
                    kind: kind
                        .parse::<ContributionKind>()
                        .map_err(LedgerError::Validation)?,
                    amount: row.get("amount"),
                    date: row.get("date"),
                })
            })
            .collect()
    }

    /// Record a contribution for a member. The historical "rejesho" type is
    /// accepted here but never stored: it routes the amount to the member's
    /// newest open loan as a repayment.
    pub async fn record_contribution(
        &self,
        group_id: i64,
        request: CreateContributionRequest,
        today: NaiveDate,
    ) -> LedgerResult<RecordedContribution> {
        if request.amount <= 0.0 {
            return Err(LedgerError::validation("contribution amount must be positive"));
        }
        self.members.require_person(group_id, request.member_id).await?;

        if request.kind.trim() == "rejesho" {
            let status = self
                .loans
                .record_repayment_for_member(group_id, request.member_id, request.amount, today)
                .await?;
            return Ok(RecordedContribution::RoutedToLoan { status });
        }

        let kind = parse_operator_kind(&request.kind)?;
        let result = sqlx::query(
            "INSERT INTO contributions (group_id, member_id, type, amount, date) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(group_id)
        .bind(request.member_id)
        .bind(kind.as_str())
        .bind(request.amount)
        .bind(today)
        .execute(self.db.pool())
        .await?;

        let contribution_id = result.last_insert_rowid();
        info!(
            "Recorded {} contribution of {} for member {}",
            kind, request.amount, request.member_id
        );
        Ok(RecordedContribution::Saved(
            self.get_contribution(group_id, contribution_id).await?,
        ))
    }

    /// Edit a contribution. System-generated rows are immutable, and a row
    /// can never be retyped into a system-generated kind.
    pub async fn update_contribution(
        &self,
        group_id: i64,
        contribution_id: i64,
        request: UpdateContributionRequest,
    ) -> LedgerResult<Contribution> {
        if request.amount <= 0.0 {
            return Err(LedgerError::validation("contribution amount must be positive"));
        }

        let existing = self.get_contribution(group_id, contribution_id).await?;
        if existing.kind.is_system_generated() {
            return Err(LedgerError::integrity(
                "system-generated contributions cannot be edited",
            ));
        }
        let kind = parse_operator_kind(&request.kind)?;

        sqlx::query(
            "UPDATE contributions SET type = ?, amount = ?, date = ? WHERE id = ? AND group_id = ?",
        )
        .bind(kind.as_str())
        .bind(request.amount)
        .bind(request.date)
        .bind(contribution_id)
        .bind(group_id)
        .execute(self.db.pool())
        .await?;

        self.get_contribution(group_id, contribution_id).await
    }

    pub async fn delete_contribution(
        &self,
        group_id: i64,
        contribution_id: i64,
    ) -> LedgerResult<()> {
        let existing = self.get_contribution(group_id, contribution_id).await?;
        if existing.kind.is_system_generated() {
            return Err(LedgerError::integrity(
                "system-generated contributions cannot be deleted",
            ));
        }

        sqlx::query("DELETE FROM contributions WHERE id = ? AND group_id = ?")
            .bind(contribution_id)
            .bind(group_id)
            .execute(self.db.pool())
            .await?;
        info!("Deleted contribution {} from group {}", contribution_id, group_id);
        Ok(())
    }

    /// Draw from the jamii fund for a group expense. The positive input is
    /// stored as a negative jamii_deduction row against the group's expense
    /// account.
    pub async fn record_jamii_deduction(
        &self,
        group_id: i64,
        amount: f64,
        today: NaiveDate,
    ) -> LedgerResult<Contribution> {
        if amount <= 0.0 {
            return Err(LedgerError::validation("deduction amount must be positive"));
        }
        let expense_account = self.members.expense_account_id(group_id).await?;

        let result = sqlx::query(
            "INSERT INTO contributions (group_id, member_id, type, amount, date) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(group_id)
        .bind(expense_account)
        .bind(ContributionKind::JamiiDeduction.as_str())
        .bind(-amount)
        .bind(today)
        .execute(self.db.pool())
        .await?;

        let contribution_id = result.last_insert_rowid();
        info!("Recorded jamii deduction of {} for group {}", amount, group_id);
        self.get_contribution(group_id, contribution_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::group_service::GroupService;
    use crate::settings::SettingsService;
    use shared::{CreateMemberRequest, LoanStatus};

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    async fn setup() -> (DbConnection, i64, i64) {
        let db = DbConnection::init_test().await.unwrap();
        let group_id = GroupService::new(db.clone())
            .create_group("Test Group", date("2025-01-01"))
            .await
            .unwrap();
        let member = MemberService::new(db.clone())
            .create_member(
                group_id,
                CreateMemberRequest { name: "Rehema".to_string(), phone: None },
                date("2025-01-01"),
            )
            .await
            .unwrap();
        (db, group_id, member.id)
    }

    fn request(member_id: i64, kind: &str, amount: f64) -> CreateContributionRequest {
        CreateContributionRequest { member_id, kind: kind.to_string(), amount }
    }

    #[tokio::test]
    async fn records_and_lists_operator_contributions() {
        let (db, group_id, member_id) = setup().await;
        let service = ContributionService::new(db);

        for (kind, amount) in [("hisa", 10_000.0), ("hisa anzia", 50_000.0), ("jamii", 2_000.0)] {
            let recorded = service
                .record_contribution(group_id, request(member_id, kind, amount), date("2025-01-10"))
                .await
                .unwrap();
            assert!(matches!(recorded, RecordedContribution::Saved(_)));
        }

        let list = service.list_contributions(group_id).await.unwrap();
        assert_eq!(list.len(), 3);
        assert!(list.iter().all(|c| c.member_name == "Rehema"));
    }

    #[tokio::test]
    async fn system_kinds_cannot_be_recorded_or_edited() {
        let (db, group_id, member_id) = setup().await;
        let service = ContributionService::new(db);

        for kind in ["jamii_deduction", "penalty_payment", "bogus"] {
            let err = service
                .record_contribution(group_id, request(member_id, kind, 1_000.0), date("2025-01-10"))
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::Validation(_)), "kind {}", kind);
        }

        let deduction = service
            .record_jamii_deduction(group_id, 5_000.0, date("2025-01-10"))
            .await
            .unwrap();
        assert_eq!(deduction.amount, -5_000.0);
        assert_eq!(deduction.kind, ContributionKind::JamiiDeduction);

        let err = service
            .update_contribution(
                group_id,
                deduction.id,
                UpdateContributionRequest {
                    kind: "hisa".to_string(),
                    amount: 5_000.0,
                    date: date("2025-01-10"),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Integrity(_)));

        let err = service.delete_contribution(group_id, deduction.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::Integrity(_)));
    }

    #[tokio::test]
    async fn editable_contribution_can_be_retyped_within_operator_kinds() {
        let (db, group_id, member_id) = setup().await;
        let service = ContributionService::new(db);

        let saved = match service
            .record_contribution(group_id, request(member_id, "hisa", 10_000.0), date("2025-01-10"))
            .await
            .unwrap()
        {
            RecordedContribution::Saved(c) => c,
            other => panic!("unexpected routing: {:?}", other),
        };

        let updated = service
            .update_contribution(
                group_id,
                saved.id,
                UpdateContributionRequest {
                    kind: "jamii".to_string(),
                    amount: 2_000.0,
                    date: date("2025-01-12"),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.kind, ContributionKind::Jamii);
        assert_eq!(updated.amount, 2_000.0);

        let err = service
            .update_contribution(
                group_id,
                saved.id,
                UpdateContributionRequest {
                    kind: "penalty_payment".to_string(),
                    amount: 2_000.0,
                    date: date("2025-01-12"),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        service.delete_contribution(group_id, saved.id).await.unwrap();
    }

    #[tokio::test]
    async fn rejesho_is_routed_to_a_loan_not_stored() {
        let (db, group_id, member_id) = setup().await;
        let settings = SettingsService::new(db.clone()).resolve(group_id).await.unwrap();
        LoanService::new(db.clone())
            .create_loan(group_id, member_id, 500_000.0, &settings, date("2025-01-05"))
            .await
            .unwrap();
        let service = ContributionService::new(db.clone());

        let recorded = service
            .record_contribution(
                group_id,
                request(member_id, "rejesho", 550_000.0),
                date("2025-01-20"),
            )
            .await
            .unwrap();
        assert_eq!(
            recorded,
            RecordedContribution::RoutedToLoan { status: LoanStatus::Cleared }
        );

        // No contribution row; the money lives in the repayments ledger.
        assert!(service.list_contributions(group_id).await.unwrap().is_empty());
        let repaid = sqlx::query("SELECT COALESCE(SUM(amount), 0.0) AS total FROM repayments")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(repaid.get::<f64, _>("total"), 550_000.0);
    }

    #[tokio::test]
    async fn contributions_require_a_person_member() {
        let (db, group_id, _member_id) = setup().await;
        let expense_account = MemberService::new(db.clone())
            .expense_account_id(group_id)
            .await
            .unwrap();
        let service = ContributionService::new(db);

        let err = service
            .record_contribution(
                group_id,
                request(expense_account, "hisa", 1_000.0),
                date("2025-01-10"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let err = service
            .record_contribution(group_id, request(999, "hisa", 1_000.0), date("2025-01-10"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }
}
