use crate::db::DbConnection;
use crate::domain::member_service::MemberService;
use crate::error::{LedgerError, LedgerResult};
use chrono::NaiveDate;
use shared::{
    ContributionKind, CreatePenaltyRequest, LoanStatus, Penalty, PenaltyLedger,
    PenaltyPaymentReceipt, PenaltyTotals, PenaltyView, UpdatePenaltyRequest,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;

/// Penalty type reserved for auto-generated late-loan penalties.
pub const LOAN_LATE: &str = "loan_late";

fn penalty_from_row(row: &SqliteRow) -> Penalty {
    Penalty {
        id: row.get("id"),
        group_id: row.get("group_id"),
        member_id: row.get("member_id"),
        loan_id: row.get("loan_id"),
        penalty_type: row.get("type"),
        amount: row.get("amount"),
        amount_paid: row.get("amount_paid"),
        description: row.get("description"),
        date: row.get("date"),
    }
}

/// Penalty engine: auto-generated lateness penalties, manual penalties,
/// partial payments and the outstanding/paid/imposed aggregates.
#[derive(Clone)]
pub struct PenaltyService {
    db: DbConnection,
    members: MemberService,
}

impl PenaltyService {
    pub fn new(db: DbConnection) -> Self {
        let members = MemberService::new(db.clone());
        Self { db, members }
    }

    pub async fn get_penalty(&self, group_id: i64, penalty_id: i64) -> LedgerResult<Penalty> {
        let row = sqlx::query("SELECT * FROM penalties WHERE id = ? AND group_id = ?")
            .bind(penalty_id)
            .bind(group_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(LedgerError::NotFound("penalty"))?;
        Ok(penalty_from_row(&row))
    }

    pub async fn list_penalties(&self, group_id: i64) -> LedgerResult<PenaltyLedger> {
        let rows = sqlx::query(
            r#"
            SELECT p.*, m.name AS member_name
            FROM penalties p
            JOIN members m ON p.member_id = m.id
            WHERE p.group_id = ?
            ORDER BY p.date DESC, p.id DESC
            "#,
        )
        .bind(group_id)
        .fetch_all(self.db.pool())
        .await?;

        let ledger: Vec<PenaltyView> = rows
            .iter()
            .map(|row| PenaltyView {
                id: row.get("id"),
                member_id: row.get("member_id"),
                member_name: row.get("member_name"),
                loan_id: row.get("loan_id"),
                penalty_type: row.get("type"),
                amount: row.get("amount"),
                amount_paid: row.get("amount_paid"),
                description: row.get("description"),
                date: row.get("date"),
            })
            .collect();

        let total_outstanding = ledger.iter().map(|p| p.amount - p.amount_paid).sum();
        Ok(PenaltyLedger { total_outstanding, ledger })
    }

    /// Manually impose a penalty on a member.
    pub async fn create_penalty(
        &self,
        group_id: i64,
        request: CreatePenaltyRequest,
        today: NaiveDate,
    ) -> LedgerResult<Penalty> {
        if request.amount <= 0.0 {
            return Err(LedgerError::validation("penalty amount must be positive"));
        }
        let penalty_type = request.penalty_type.trim();
        if penalty_type.is_empty() {
            return Err(LedgerError::validation("penalty type is required"));
        }
        self.members.require_person(group_id, request.member_id).await?;

        let result = sqlx::query(
            r#"
            INSERT INTO penalties (group_id, member_id, loan_id, type, amount, amount_paid, description, date)
            VALUES (?, ?, NULL, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(group_id)
        .bind(request.member_id)
        .bind(penalty_type)
        .bind(request.amount)
        .bind(&request.description)
        .bind(today)
        .execute(self.db.pool())
        .await?;

        let penalty_id = result.last_insert_rowid();
        info!(
            "Imposed {} penalty of {} on member {} (penalty {})",
            penalty_type, request.amount, request.member_id, penalty_id
        );
        self.get_penalty(group_id, penalty_id).await
    }

    /// Edit a penalty's amount and description. The amount can never be
    /// lowered below what has already been paid against it.
    pub async fn update_penalty(
        &self,
        group_id: i64,
        penalty_id: i64,
        request: UpdatePenaltyRequest,
    ) -> LedgerResult<Penalty> {
        if request.amount <= 0.0 {
            return Err(LedgerError::validation("penalty amount must be positive"));
        }

        let penalty = self.get_penalty(group_id, penalty_id).await?;
        if request.amount < penalty.amount_paid {
            return Err(LedgerError::integrity(
                "penalty amount cannot be lower than the amount already paid",
            ));
        }

        sqlx::query("UPDATE penalties SET amount = ?, description = ? WHERE id = ? AND group_id = ?")
            .bind(request.amount)
            .bind(&request.description)
            .bind(penalty_id)
            .bind(group_id)
            .execute(self.db.pool())
            .await?;

        self.get_penalty(group_id, penalty_id).await
    }

    /// Delete a penalty. Auto-generated lateness penalties are never
    /// deletable: removing one would let the next sweep re-insert a fresh
    /// snapshot with a different days-late amount. Manual penalties are
    /// refused once payments have been applied, since the audit-trail
    /// contribution rows would be left dangling.
    pub async fn delete_penalty(&self, group_id: i64, penalty_id: i64) -> LedgerResult<()> {
        let penalty = self.get_penalty(group_id, penalty_id).await?;
        if penalty.penalty_type == LOAN_LATE && penalty.loan_id.is_some() {
            return Err(LedgerError::integrity(
                "auto-generated loan penalties cannot be deleted; clear the loan instead",
            ));
        }
        if penalty.amount_paid > 0.0 {
            return Err(LedgerError::integrity(
                "cannot delete a penalty with recorded payments",
            ));
        }

        sqlx::query("DELETE FROM penalties WHERE id = ? AND group_id = ?")
            .bind(penalty_id)
            .bind(group_id)
            .execute(self.db.pool())
            .await?;
        info!("Deleted penalty {} from group {}", penalty_id, group_id);
        Ok(())
    }

    /// One-time lateness snapshot for every overdue loan.
    ///
    /// A loan past due gets exactly one `loan_late` penalty of
    /// `days_late * daily_penalty`, taken at first detection and never
    /// updated afterwards. Repeat invocations are no-ops once the penalty
    /// exists, which makes this safe to run as a side effect of reads.
    pub async fn auto_insert_loan_penalties(
        &self,
        group_id: i64,
        daily_penalty: f64,
        today: NaiveDate,
    ) -> LedgerResult<u32> {
        let rows = sqlx::query(
            r#"
            SELECT id, member_id, due_date FROM loans
            WHERE group_id = ? AND status IN ('Active', 'Overdue') AND due_date < ?
            "#,
        )
        .bind(group_id)
        .bind(today)
        .fetch_all(self.db.pool())
        .await?;

        let mut inserted = 0;
        for row in &rows {
            let loan_id: i64 = row.get("id");
            let member_id: i64 = row.get("member_id");
            let due_date: NaiveDate = row.get("due_date");

            let days_late = (today - due_date).num_days();
            if days_late <= 0 {
                continue;
            }

            let mut tx = self.db.pool().begin().await?;

            let existing = sqlx::query(
                "SELECT COUNT(*) AS n FROM penalties WHERE loan_id = ? AND type = ?",
            )
            .bind(loan_id)
            .bind(LOAN_LATE)
            .fetch_one(&mut *tx)
            .await?;
            if existing.get::<i64, _>("n") > 0 {
                tx.commit().await?;
                continue;
            }

            let amount = days_late as f64 * daily_penalty;
            sqlx::query(
                r#"
                INSERT INTO penalties (group_id, member_id, loan_id, type, amount, amount_paid, description, date)
                VALUES (?, ?, ?, ?, ?, 0, ?, ?)
                "#,
            )
            .bind(group_id)
            .bind(member_id)
            .bind(loan_id)
            .bind(LOAN_LATE)
            .bind(amount)
            .bind(format!("Loan {} days late", days_late))
            .bind(today)
            .execute(&mut *tx)
            .await?;

            sqlx::query("UPDATE loans SET status = 'Overdue' WHERE id = ?")
                .bind(loan_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            info!(
                "Auto-inserted late penalty of {} for loan {} ({} days late)",
                amount, loan_id, days_late
            );
            inserted += 1;
        }
        Ok(inserted)
    }

    /// Apply a payment against a penalty. Over-payment is capped at the
    /// remaining due; the applied amount is also logged as an audit-trail
    /// contribution for the member.
    pub async fn record_payment(
        &self,
        group_id: i64,
        penalty_id: i64,
        proposed: f64,
        today: NaiveDate,
    ) -> LedgerResult<PenaltyPaymentReceipt> {
        if proposed <= 0.0 {
            return Err(LedgerError::validation("payment amount must be positive"));
        }

        let mut tx = self.db.pool().begin().await?;

        let row = sqlx::query(
            "SELECT member_id, amount, amount_paid FROM penalties WHERE id = ? AND group_id = ?",
        )
        .bind(penalty_id)
        .bind(group_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::NotFound("penalty"))?;

        let member_id: i64 = row.get("member_id");
        let amount: f64 = row.get("amount");
        let amount_paid: f64 = row.get("amount_paid");

        let remaining_due = amount - amount_paid;
        if remaining_due <= 0.0 {
            return Err(LedgerError::validation("penalty is already fully paid"));
        }

        let applied = proposed.min(remaining_due);
        let new_paid = amount_paid + applied;

        sqlx::query("UPDATE penalties SET amount_paid = ? WHERE id = ? AND group_id = ?")
            .bind(new_paid)
            .bind(penalty_id)
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO contributions (group_id, member_id, type, amount, date) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(group_id)
        .bind(member_id)
        .bind(ContributionKind::PenaltyPayment.as_str())
        .bind(applied)
        .bind(today)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            "Applied {} of proposed {} to penalty {}; remaining {}",
            applied,
            proposed,
            penalty_id,
            amount - new_paid
        );

        Ok(PenaltyPaymentReceipt {
            penalty_id,
            applied,
            amount_paid: new_paid,
            remaining_due: amount - new_paid,
        })
    }

    /// Group-level imposed/paid/outstanding totals, computed independently
    /// from the store rather than derived from one another.
    pub async fn group_totals(&self, group_id: i64) -> LedgerResult<PenaltyTotals> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(amount), 0.0) AS imposed,
                COALESCE(SUM(amount_paid), 0.0) AS paid,
                COALESCE(SUM(amount - amount_paid), 0.0) AS outstanding
            FROM penalties WHERE group_id = ?
            "#,
        )
        .bind(group_id)
        .fetch_one(self.db.pool())
        .await?;

        Ok(PenaltyTotals {
            imposed: row.get("imposed"),
            paid: row.get("paid"),
            outstanding: row.get("outstanding"),
        })
    }

    pub async fn member_totals(&self, group_id: i64, member_id: i64) -> LedgerResult<PenaltyTotals> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(amount), 0.0) AS imposed,
                COALESCE(SUM(amount_paid), 0.0) AS paid,
                COALESCE(SUM(amount - amount_paid), 0.0) AS outstanding
            FROM penalties WHERE group_id = ? AND member_id = ?
            "#,
        )
        .bind(group_id)
        .bind(member_id)
        .fetch_one(self.db.pool())
        .await?;

        Ok(PenaltyTotals {
            imposed: row.get("imposed"),
            paid: row.get("paid"),
            outstanding: row.get("outstanding"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::group_service::GroupService;
    use crate::domain::loan_service::LoanService;
    use crate::settings::SettingsService;
    use shared::CreateMemberRequest;

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
                CreateMemberRequest { name: "Neema".to_string(), phone: None },
                date("2025-01-01"),
            )
            .await
            .unwrap();
        (db, group_id, member.id)
    }

    #[tokio::test]
    async fn payment_caps_at_remaining_due_and_logs_audit_row() {
        let (db, group_id, member_id) = setup().await;
        let service = PenaltyService::new(db.clone());

        let penalty = service
            .create_penalty(
                group_id,
                CreatePenaltyRequest {
                    member_id,
                    penalty_type: "meeting_absence".to_string(),
                    amount: 5_000.0,
                    description: String::new(),
                },
                date("2025-02-01"),
            )
            .await
            .unwrap();

        let receipt = service
            .record_payment(group_id, penalty.id, 7_000.0, date("2025-02-05"))
            .await
            .unwrap();
        assert_eq!(receipt.applied, 5_000.0);
        assert_eq!(receipt.amount_paid, 5_000.0);
        assert_eq!(receipt.remaining_due, 0.0);

        let audit = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0.0) AS total FROM contributions WHERE member_id = ? AND type = 'penalty_payment'",
        )
        .bind(member_id)
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(audit.get::<f64, _>("total"), 5_000.0);

        let err = service
            .record_payment(group_id, penalty.id, 1_000.0, date("2025-02-06"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn partial_payments_accumulate() {
        let (db, group_id, member_id) = setup().await;
        let service = PenaltyService::new(db);

        let penalty = service
            .create_penalty(
                group_id,
                CreatePenaltyRequest {
                    member_id,
                    penalty_type: "late_contribution".to_string(),
                    amount: 10_000.0,
                    description: String::new(),
                },
                date("2025-02-01"),
            )
            .await
            .unwrap();

        let first = service
            .record_payment(group_id, penalty.id, 4_000.0, date("2025-02-02"))
            .await
            .unwrap();
        assert_eq!(first.remaining_due, 6_000.0);

        let second = service
            .record_payment(group_id, penalty.id, 6_000.0, date("2025-02-03"))
            .await
            .unwrap();
        assert_eq!(second.amount_paid, 10_000.0);
        assert_eq!(second.remaining_due, 0.0);

        let totals = service.group_totals(group_id).await.unwrap();
        assert_eq!(totals.imposed, 10_000.0);
        assert_eq!(totals.paid, 10_000.0);
        assert_eq!(totals.outstanding, 0.0);
    }

    #[tokio::test]
    async fn auto_insert_is_a_one_time_snapshot() {
        let (db, group_id, member_id) = setup().await;
        let settings = SettingsService::new(db.clone()).resolve(group_id).await.unwrap();
        let loans = LoanService::new(db.clone());
        let service = PenaltyService::new(db.clone());

        // Due 2025-03-03; evaluated 10 days later.
        loans
            .create_loan(group_id, member_id, 500_000.0, &settings, date("2025-02-01"))
            .await
            .unwrap();

        let inserted = service
            .auto_insert_loan_penalties(group_id, settings.daily_penalty, date("2025-03-13"))
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let ledger = service.list_penalties(group_id).await.unwrap();
        assert_eq!(ledger.ledger.len(), 1);
        assert_eq!(ledger.ledger[0].amount, 10_000.0);
        assert_eq!(ledger.ledger[0].penalty_type, LOAN_LATE);
        assert!(ledger.ledger[0].loan_id.is_some());

        let loan_status = sqlx::query("SELECT status FROM loans WHERE group_id = ?")
            .bind(group_id)
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(loan_status.get::<String, _>("status"), "Overdue");

        // Later runs neither duplicate nor grow the snapshot.
        let inserted = service
            .auto_insert_loan_penalties(group_id, settings.daily_penalty, date("2025-04-01"))
            .await
            .unwrap();
        assert_eq!(inserted, 0);
        let ledger = service.list_penalties(group_id).await.unwrap();
        assert_eq!(ledger.ledger.len(), 1);
        assert_eq!(ledger.ledger[0].amount, 10_000.0);
    }

    #[tokio::test]
    async fn auto_insert_skips_loans_not_yet_due() {
        let (db, group_id, member_id) = setup().await;
        let settings = SettingsService::new(db.clone()).resolve(group_id).await.unwrap();
        let loans = LoanService::new(db.clone());
        let service = PenaltyService::new(db);

        loans
            .create_loan(group_id, member_id, 500_000.0, &settings, date("2025-02-01"))
            .await
            .unwrap();

        let inserted = service
            .auto_insert_loan_penalties(group_id, settings.daily_penalty, date("2025-02-15"))
            .await
            .unwrap();
        assert_eq!(inserted, 0);
    }

    #[tokio::test]
    async fn edit_below_paid_and_delete_with_payments_are_refused() {
        let (db, group_id, member_id) = setup().await;
        let service = PenaltyService::new(db);

        let penalty = service
            .create_penalty(
                group_id,
                CreatePenaltyRequest {
                    member_id,
                    penalty_type: "late_contribution".to_string(),
                    amount: 8_000.0,
                    description: String::new(),
                },
                date("2025-02-01"),
            )
            .await
            .unwrap();
        service
            .record_payment(group_id, penalty.id, 3_000.0, date("2025-02-02"))
            .await
            .unwrap();

        let err = service
            .update_penalty(
                group_id,
                penalty.id,
                UpdatePenaltyRequest { amount: 2_000.0, description: String::new() },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Integrity(_)));

        let err = service.delete_penalty(group_id, penalty.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::Integrity(_)));

        // Raising the amount is fine.
        let updated = service
            .update_penalty(
                group_id,
                penalty.id,
                UpdatePenaltyRequest { amount: 12_000.0, description: "raised".to_string() },
            )
            .await
            .unwrap();
        assert_eq!(updated.amount, 12_000.0);
        assert_eq!(updated.amount_paid, 3_000.0);
    }

    #[tokio::test]
    async fn auto_generated_loan_penalty_cannot_be_deleted() {
        let (db, group_id, member_id) = setup().await;
        let settings = SettingsService::new(db.clone()).resolve(group_id).await.unwrap();
        let loans = LoanService::new(db.clone());
        let service = PenaltyService::new(db);

        // Due 2025-03-03; swept 40 days later.
        loans
            .create_loan(group_id, member_id, 500_000.0, &settings, date("2025-02-01"))
            .await
            .unwrap();
        service
            .auto_insert_loan_penalties(group_id, settings.daily_penalty, date("2025-04-12"))
            .await
            .unwrap();

        let ledger = service.list_penalties(group_id).await.unwrap();
        let penalty_id = ledger.ledger[0].id;
        assert_eq!(ledger.ledger[0].amount_paid, 0.0);

        // Unpaid, but still protected: the snapshot must survive.
        let err = service.delete_penalty(group_id, penalty_id).await.unwrap_err();
        assert!(matches!(err, LedgerError::Integrity(_)));
        assert_eq!(service.list_penalties(group_id).await.unwrap().ledger.len(), 1);
    }

    #[tokio::test]
    async fn unpaid_penalty_can_be_deleted() {
        let (db, group_id, member_id) = setup().await;
        let service = PenaltyService::new(db);

        let penalty = service
            .create_penalty(
                group_id,
                CreatePenaltyRequest {
                    member_id,
                    penalty_type: "meeting_absence".to_string(),
                    amount: 2_000.0,
                    description: String::new(),
                },
                date("2025-02-01"),
            )
            .await
            .unwrap();

        service.delete_penalty(group_id, penalty.id).await.unwrap();
        assert!(matches!(
            service.get_penalty(group_id, penalty.id).await.unwrap_err(),
            LedgerError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn member_totals_are_scoped() {
        let (db, group_id, member_id) = setup().await;
        let other = MemberService::new(db.clone())
            .create_member(
                group_id,
                CreateMemberRequest { name: "Zawadi".to_string(), phone: None },
                date("2025-01-01"),
            )
            .await
            .unwrap();
        let service = PenaltyService::new(db);

        for (who, amount) in [(member_id, 5_000.0), (other.id, 3_000.0)] {
            service
                .create_penalty(
                    group_id,
                    CreatePenaltyRequest {
                        member_id: who,
                        penalty_type: "late_contribution".to_string(),
                        amount,
                        description: String::new(),
                    },
                    date("2025-02-01"),
                )
                .await
                .unwrap();
        }

        let totals = service.member_totals(group_id, member_id).await.unwrap();
        assert_eq!(totals.imposed, 5_000.0);
        let group = service.group_totals(group_id).await.unwrap();
        assert_eq!(group.imposed, 8_000.0);
        assert_eq!(group.outstanding, group.imposed - group.paid);
    }
}
