use crate::db::DbConnection;
use crate::domain::member_service::MemberService;
use crate::error::{LedgerError, LedgerResult};
use crate::settings::{GroupSettings, LoanTier};
use chrono::{Duration, NaiveDate};
use shared::{Loan, LoanStatus, LoanView, MemberLoanBalances, Repayment, UpdateLoanRequest};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;

/// Loan duration for a principal, from the tier table.
///
/// Tiers are checked in declared order and the first one whose ceiling
/// covers the principal wins. This is a first-match-wins policy, not a
/// smallest-ceiling search; rule order is part of the group's configuration.
pub fn duration_for_principal(principal: f64, tiers: &[LoanTier]) -> LedgerResult<u32> {
    for tier in tiers {
        if principal <= tier.max_principal {
            return Ok(tier.months);
        }
    }
    Err(LedgerError::validation(
        "loan principal exceeds the maximum allowed by the group's tiers",
    ))
}

/// Pure status derivation from the repayment ledger and the current date.
/// The materialized-cache write lives in [`LoanService::refresh_status`],
/// kept separate so this stays trivially testable.
pub fn derive_status(total: f64, repaid: f64, due_date: NaiveDate, today: NaiveDate) -> LoanStatus {
    if total - repaid <= 0.0 {
        LoanStatus::Cleared
    } else if today > due_date {
        LoanStatus::Overdue
    } else {
        LoanStatus::Active
    }
}

pub(crate) fn loan_from_row(row: &SqliteRow) -> LedgerResult<Loan> {
    let status: String = row.get("status");
    Ok(Loan {
        id: row.get("id"),
        group_id: row.get("group_id"),
        member_id: row.get("member_id"),
        principal: row.get("principal"),
        interest: row.get("interest"),
        total: row.get("total"),
        start_date: row.get("start_date"),
        due_date: row.get("due_date"),
        status: status.parse::<LoanStatus>().map_err(LedgerError::Validation)?,
    })
}

/// Loan engine: issuance, status derivation and outstanding balances.
#[derive(Clone)]
pub struct LoanService {
    db: DbConnection,
    members: MemberService,
}

impl LoanService {
    pub fn new(db: DbConnection) -> Self {
        let members = MemberService::new(db.clone());
        Self { db, members }
    }

    /// Issue a loan. Interest is computed once, here, and never
    /// recalculated; the due date is fixed at 30 days per tier month.
    pub async fn create_loan(
        &self,
        group_id: i64,
        member_id: i64,
        principal: f64,
        settings: &GroupSettings,
        today: NaiveDate,
    ) -> LedgerResult<Loan> {
        if principal <= 0.0 {
            return Err(LedgerError::validation("loan principal must be positive"));
        }
        self.members.require_person(group_id, member_id).await?;

        let months = duration_for_principal(principal, &settings.loan_tiers)?;
        let interest = (principal * settings.interest_rate).round();
        let total = principal + interest;
        let due_date = today + Duration::days(30 * i64::from(months));

        let result = sqlx::query(
            r#"
            INSERT INTO loans (group_id, member_id, principal, interest, total, start_date, due_date, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, 'Active')
            "#,
        )
        .bind(group_id)
        .bind(member_id)
        .bind(principal)
        .bind(interest)
        .bind(total)
        .bind(today)
        .bind(due_date)
        .execute(self.db.pool())
        .await?;

        let loan_id = result.last_insert_rowid();
        info!(
            "Issued loan {} to member {}: principal {}, interest {}, due {}",
            loan_id, member_id, principal, interest, due_date
        );
        self.get_loan(group_id, loan_id).await
    }

    pub async fn get_loan(&self, group_id: i64, loan_id: i64) -> LedgerResult<Loan> {
        let row = sqlx::query("SELECT * FROM loans WHERE id = ? AND group_id = ?")
            .bind(loan_id)
            .bind(group_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(LedgerError::NotFound("loan"))?;
        loan_from_row(&row)
    }

    /// Sum of repayments recorded against a loan.
    pub async fn repaid_total(&self, group_id: i64, loan_id: i64) -> LedgerResult<f64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0.0) AS total FROM repayments WHERE loan_id = ? AND group_id = ?",
        )
        .bind(loan_id)
        .bind(group_id)
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.get("total"))
    }

    /// Re-derive a loan's status and persist it only when it changed.
    /// Calling this twice with unchanged inputs performs no second write.
    pub async fn refresh_status(
        &self,
        group_id: i64,
        loan_id: i64,
        today: NaiveDate,
    ) -> LedgerResult<LoanStatus> {
        let loan = self.get_loan(group_id, loan_id).await?;
        let repaid = self.repaid_total(group_id, loan_id).await?;
        let status = derive_status(loan.total, repaid, loan.due_date, today);

        if status != loan.status {
            sqlx::query("UPDATE loans SET status = ? WHERE id = ? AND group_id = ?")
                .bind(status.as_str())
                .bind(loan_id)
                .bind(group_id)
                .execute(self.db.pool())
                .await?;
            info!("Loan {} status {} -> {}", loan_id, loan.status, status);
        }
        Ok(status)
    }

    /// List loans with their repayment position, refreshing any stale
    /// cached status along the way.
    pub async fn list_loans(&self, group_id: i64, today: NaiveDate) -> LedgerResult<Vec<LoanView>> {
        let rows = sqlx::query(
            r#"
            SELECT l.*, m.name AS member_name
            FROM loans l
            JOIN members m ON l.member_id = m.id
            WHERE l.group_id = ?
            ORDER BY l.start_date DESC, l.id DESC
            "#,
        )
        .bind(group_id)
        .fetch_all(self.db.pool())
        .await?;

        let mut views = Vec::with_capacity(rows.len());
        for row in &rows {
            let loan = loan_from_row(row)?;
            let repaid = self.repaid_total(group_id, loan.id).await?;
            let status = derive_status(loan.total, repaid, loan.due_date, today);

            if status != loan.status {
                sqlx::query("UPDATE loans SET status = ? WHERE id = ? AND group_id = ?")
                    .bind(status.as_str())
                    .bind(loan.id)
                    .bind(group_id)
                    .execute(self.db.pool())
                    .await?;
            }

            views.push(LoanView {
                id: loan.id,
                member_id: loan.member_id,
                member_name: row.get("member_name"),
                principal: loan.principal,
                interest: loan.interest,
                total: loan.total,
                start_date: loan.start_date,
                due_date: loan.due_date,
                repaid,
                remaining: loan.total - repaid,
                status,
            });
        }
        Ok(views)
    }

    /// Append a repayment and refresh the loan's status, atomically.
    pub async fn record_repayment(
        &self,
        group_id: i64,
        loan_id: i64,
        amount: f64,
        today: NaiveDate,
    ) -> LedgerResult<LoanStatus> {
        if amount <= 0.0 {
            return Err(LedgerError::validation("repayment amount must be positive"));
        }

        let mut tx = self.db.pool().begin().await?;

        let row = sqlx::query("SELECT total, status FROM loans WHERE id = ? AND group_id = ?")
            .bind(loan_id)
            .bind(group_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(LedgerError::NotFound("loan"))?;
        let total: f64 = row.get("total");
        let cached: String = row.get("status");
        let cached = cached.parse::<LoanStatus>().map_err(LedgerError::Validation)?;

        sqlx::query("INSERT INTO repayments (group_id, loan_id, amount, date) VALUES (?, ?, ?, ?)")
            .bind(group_id)
            .bind(loan_id)
            .bind(amount)
            .bind(today)
            .execute(&mut *tx)
            .await?;

        let repaid_row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0.0) AS total FROM repayments WHERE loan_id = ? AND group_id = ?",
        )
        .bind(loan_id)
        .bind(group_id)
        .fetch_one(&mut *tx)
        .await?;
        let repaid: f64 = repaid_row.get("total");

        let due_row = sqlx::query("SELECT due_date FROM loans WHERE id = ?")
            .bind(loan_id)
            .fetch_one(&mut *tx)
            .await?;
        let due_date: NaiveDate = due_row.get("due_date");

        let status = derive_status(total, repaid, due_date, today);
        if status != cached {
            sqlx::query("UPDATE loans SET status = ? WHERE id = ? AND group_id = ?")
                .bind(status.as_str())
                .bind(loan_id)
                .bind(group_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!("Repayment of {} on loan {}; status now {}", amount, loan_id, status);
        Ok(status)
    }

    /// Route a repayment to the member's newest non-cleared loan.
    pub async fn record_repayment_for_member(
        &self,
        group_id: i64,
        member_id: i64,
        amount: f64,
        today: NaiveDate,
    ) -> LedgerResult<LoanStatus> {
        let row = sqlx::query(
            r#"
            SELECT id FROM loans
            WHERE member_id = ? AND group_id = ? AND status != 'Cleared'
            ORDER BY start_date DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(member_id)
        .bind(group_id)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| LedgerError::validation("no active loan found for this member"))?;

        let loan_id: i64 = row.get("id");
        self.record_repayment(group_id, loan_id, amount, today).await
    }

    pub async fn list_repayments(
        &self,
        group_id: i64,
        loan_id: i64,
    ) -> LedgerResult<Vec<Repayment>> {
        self.get_loan(group_id, loan_id).await?;
        let rows = sqlx::query(
            "SELECT * FROM repayments WHERE loan_id = ? AND group_id = ? ORDER BY date DESC, id DESC",
        )
        .bind(loan_id)
        .bind(group_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| Repayment {
                id: row.get("id"),
                group_id: row.get("group_id"),
                loan_id: row.get("loan_id"),
                amount: row.get("amount"),
                date: row.get("date"),
            })
            .collect())
    }

    /// Manual correction path: only the due date and cached status may be
    /// edited. Money fields are immutable; corrections require deleting and
    /// recreating the loan.
    pub async fn update_loan(
        &self,
        group_id: i64,
        loan_id: i64,
        request: UpdateLoanRequest,
    ) -> LedgerResult<Loan> {
        self.get_loan(group_id, loan_id).await?;

        sqlx::query("UPDATE loans SET due_date = ?, status = ? WHERE id = ? AND group_id = ?")
            .bind(request.due_date)
            .bind(request.status.as_str())
            .bind(loan_id)
            .bind(group_id)
            .execute(self.db.pool())
            .await?;

        self.get_loan(group_id, loan_id).await
    }

    /// Group liability: sum of `total` across non-cleared loans minus all
    /// repayments on those loans, floored at zero. Deliberately a single
    /// global figure, not a sum of per-loan remainders.
    pub async fn total_outstanding_for_group(&self, group_id: i64) -> LedgerResult<f64> {
        let liability_row = sqlx::query(
            "SELECT COALESCE(SUM(total), 0.0) AS total FROM loans WHERE group_id = ? AND status != 'Cleared'",
        )
        .bind(group_id)
        .fetch_one(self.db.pool())
        .await?;
        let liability: f64 = liability_row.get("total");

        let repaid_row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(r.amount), 0.0) AS total
            FROM repayments r
            JOIN loans l ON r.loan_id = l.id
            WHERE l.group_id = ? AND l.status != 'Cleared'
            "#,
        )
        .bind(group_id)
        .fetch_one(self.db.pool())
        .await?;
        let repaid: f64 = repaid_row.get("total");

        Ok((liability - repaid).max(0.0))
    }

    pub async fn total_principal_loaned(&self, group_id: i64) -> LedgerResult<f64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(principal), 0.0) AS total FROM loans WHERE group_id = ?",
        )
        .bind(group_id)
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.get("total"))
    }

    /// Per-member loan position. An unparseable stored due date counts as
    /// "tomorrow" for the overdue-balance estimate only; everything else
    /// still surfaces parse failures.
    pub async fn member_loan_balances(
        &self,
        group_id: i64,
        member_id: i64,
        today: NaiveDate,
    ) -> LedgerResult<MemberLoanBalances> {
        let rows = sqlx::query(
            "SELECT id, total, due_date FROM loans WHERE member_id = ? AND group_id = ?",
        )
        .bind(member_id)
        .bind(group_id)
        .fetch_all(self.db.pool())
        .await?;

        let mut total_committed = 0.0;
        let mut total_repaid = 0.0;
        let mut overdue_remaining = 0.0;

        for row in &rows {
            let loan_id: i64 = row.get("id");
            let total: f64 = row.get("total");
            let due_raw: String = row.get("due_date");
            let due_date = due_raw
                .parse::<NaiveDate>()
                .unwrap_or_else(|_| today + Duration::days(1));

            total_committed += total;
            let repaid = self.repaid_total(group_id, loan_id).await?;
            total_repaid += repaid;

            let remaining = (total - repaid).max(0.0);
            if remaining > 0.0 && due_date < today {
                overdue_remaining += remaining;
            }
        }

        Ok(MemberLoanBalances {
            total_committed,
            total_repaid,
            remaining: (total_committed - total_repaid).max(0.0),
            overdue_remaining,
        })
    }
}
