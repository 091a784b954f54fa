use crate::db::DbConnection;
use crate::domain::jamii_service::JamiiService;
use crate::domain::loan_service::LoanService;
use crate::domain::member_service::MemberService;
use crate::domain::penalty_service::PenaltyService;
use crate::domain::profit_service::ProfitService;
use crate::error::LedgerResult;
use crate::settings::GroupSettings;
use chrono::NaiveDate;
use shared::{
    ContributionKind, DashboardSummary, DistributionReport, MemberPayout, MemberStatement,
    MemberSummary,
};
use sqlx::Row;
use tracing::info;

/// Composite reporting: end-of-cycle distribution, per-member statements
/// and the dashboard snapshot.
#[derive(Clone)]
pub struct ReportService {
    db: DbConnection,
    members: MemberService,
    loans: LoanService,
    penalties: PenaltyService,
    jamii: JamiiService,
    profit: ProfitService,
}

impl ReportService {
    pub fn new(db: DbConnection) -> Self {
        let members = MemberService::new(db.clone());
        let loans = LoanService::new(db.clone());
        let penalties = PenaltyService::new(db.clone());
        let jamii = JamiiService::new(db.clone());
        let profit = ProfitService::new(db.clone());
        Self { db, members, loans, penalties, jamii, profit }
    }

    async fn contribution_sum(
        &self,
        group_id: i64,
        member_id: i64,
        kind: ContributionKind,
    ) -> LedgerResult<f64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0.0) AS total FROM contributions WHERE group_id = ? AND member_id = ? AND type = ?",
        )
        .bind(group_id)
        .bind(member_id)
        .bind(kind.as_str())
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.get("total"))
    }

    /// A member's savings base: hisa plus hisa anzia.
    async fn member_savings(&self, group_id: i64, member_id: i64) -> LedgerResult<f64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0.0) AS total FROM contributions WHERE group_id = ? AND member_id = ? AND type IN ('hisa', 'hisa anzia')",
        )
        .bind(group_id)
        .bind(member_id)
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.get("total"))
    }

    /// Group savings base across all members.
    async fn total_savings(&self, group_id: i64) -> LedgerResult<f64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0.0) AS total FROM contributions WHERE group_id = ? AND type IN ('hisa', 'hisa anzia')",
        )
        .bind(group_id)
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.get("total"))
    }

    /// End-of-cycle distribution with an optional what-if jamii expense.
    ///
    /// Net profit is shared proportionally to each member's savings base.
    /// Per-member rounding is independent: the payout shares need not sum
    /// to the net pool exactly, and that drift is accepted rather than
    /// pushed onto the last member.
    pub async fn distribute_profits(
        &self,
        group_id: i64,
        settings: &GroupSettings,
        proposed_jamii_expense: f64,
        today: NaiveDate,
    ) -> LedgerResult<DistributionReport> {
        let profit = self.profit.current_group_profit(group_id, settings).await?;
        let total_jamii_expense = profit.historical_jamii_spent + proposed_jamii_expense;
        let net_profit = (profit.gross_distributable_pool
            - settings.leadership_pay
            - total_jamii_expense)
            .max(0.0);

        let total_savings = self.total_savings(group_id).await?;
        let mut report = DistributionReport {
            gross_distributable_pool: profit.gross_distributable_pool,
            leadership_pay: settings.leadership_pay,
            historical_jamii_spent: profit.historical_jamii_spent,
            proposed_jamii_expense,
            total_jamii_expense,
            net_profit,
            total_savings,
            breakdown: Vec::new(),
        };

        // No savings means no distribution base; report the pool figures
        // without dividing.
        if total_savings <= 0.0 {
            return Ok(report);
        }

        for member in self.members.list_members(group_id).await? {
            let savings = self.member_savings(group_id, member.id).await?;
            let share_ratio = savings / total_savings;
            let profit_share = (net_profit * share_ratio).round();

            let balances = self.loans.member_loan_balances(group_id, member.id, today).await?;
            let penalties = self.penalties.member_totals(group_id, member.id).await?;
            let jamii = self.jamii.member_status(group_id, member.id, settings).await?;

            let total_deductions = balances.remaining + penalties.outstanding + jamii.shortfall;
            let final_payout = ((savings + profit_share) - total_deductions).max(0.0);

            report.breakdown.push(MemberPayout {
                member_id: member.id,
                member_name: member.name,
                savings,
                profit_share,
                loan_balance_due: balances.remaining,
                penalties_due: penalties.outstanding,
                jamii_shortfall: jamii.shortfall,
                total_deductions,
                final_payout,
            });
        }

        info!(
            "Computed distribution for group {}: net profit {} over savings base {}",
            group_id, net_profit, total_savings
        );
        Ok(report)
    }

    /// Per-member roll-ups for the members page.
    pub async fn member_summaries(
        &self,
        group_id: i64,
        settings: &GroupSettings,
        today: NaiveDate,
    ) -> LedgerResult<Vec<MemberSummary>> {
        let mut summaries = Vec::new();
        for member in self.members.list_members(group_id).await? {
            let row = sqlx::query(
                "SELECT COALESCE(SUM(amount), 0.0) AS total FROM contributions WHERE group_id = ? AND member_id = ? AND amount > 0",
            )
            .bind(group_id)
            .bind(member.id)
            .fetch_one(self.db.pool())
            .await?;
            let total_contributions: f64 = row.get("total");

            let savings = self.member_savings(group_id, member.id).await?;
            let balances = self.loans.member_loan_balances(group_id, member.id, today).await?;
            let penalties = self.penalties.member_totals(group_id, member.id).await?;
            let jamii = self.jamii.member_status(group_id, member.id, settings).await?;

            summaries.push(MemberSummary {
                id: member.id,
                name: member.name,
                phone: member.phone,
                total_contributions,
                savings,
                total_loans_committed: balances.total_committed,
                loans_outstanding: balances.remaining,
                penalties_due: penalties.outstanding,
                jamii,
            });
        }
        Ok(summaries)
    }

    /// Full financial position of one member, including the profit share
    /// and payout they would receive if the cycle closed today.
    pub async fn member_statement(
        &self,
        group_id: i64,
        member_id: i64,
        settings: &GroupSettings,
        today: NaiveDate,
    ) -> LedgerResult<MemberStatement> {
        let member = self.members.require_person(group_id, member_id).await?;

        let hisa = self.contribution_sum(group_id, member_id, ContributionKind::Hisa).await?;
        let hisa_anzia = self
            .contribution_sum(group_id, member_id, ContributionKind::HisaAnzia)
            .await?;
        let jamii_paid = self.contribution_sum(group_id, member_id, ContributionKind::Jamii).await?;
        let total_contributions = hisa + hisa_anzia + jamii_paid;

        let balances = self.loans.member_loan_balances(group_id, member_id, today).await?;
        let penalties = self.penalties.member_totals(group_id, member_id).await?;
        let jamii = self.jamii.member_status(group_id, member_id, settings).await?;

        let savings = hisa + hisa_anzia;
        let total_savings = self.total_savings(group_id).await?;
        let profit = self.profit.current_group_profit(group_id, settings).await?;
        let expected_profit_share = if total_savings > 0.0 {
            (profit.net_profit_pool * (savings / total_savings)).round()
        } else {
            0.0
        };

        let total_deductions = balances.remaining + penalties.outstanding + jamii.shortfall;

        Ok(MemberStatement {
            member_id,
            member_name: member.name,
            hisa,
            hisa_anzia,
            jamii_paid,
            total_contributions,
            total_loans: balances.total_committed,
            total_repaid: balances.total_repaid,
            remaining_loans: balances.remaining,
            overdue_balance: balances.overdue_remaining,
            penalties_due: penalties.outstanding,
            jamii,
            net_contribution_position: total_contributions - total_deductions,
            expected_profit_share,
            net_payout: ((savings + expected_profit_share) - total_deductions).max(0.0),
        })
    }

    /// Group-wide snapshot. This is a mutating read: overdue loans are
    /// swept for lateness penalties before the figures are computed.
    pub async fn dashboard(
        &self,
        group_id: i64,
        settings: &GroupSettings,
        today: NaiveDate,
    ) -> LedgerResult<DashboardSummary> {
        self.penalties
            .auto_insert_loan_penalties(group_id, settings.daily_penalty, today)
            .await?;

        let members = self.members.list_members(group_id).await?;
        let total_savings = self.total_savings(group_id).await?;
        let total_principal_loaned = self.loans.total_principal_loaned(group_id).await?;
        let loan_balance_due = self.loans.total_outstanding_for_group(group_id).await?;
        let profit = self.profit.current_group_profit(group_id, settings).await?;
        let penalties = self.penalties.group_totals(group_id).await?;

        let mut total_jamii_shortfall = 0.0;
        for member in &members {
            let jamii = self.jamii.member_status(group_id, member.id, settings).await?;
            total_jamii_shortfall += jamii.shortfall;
        }

        Ok(DashboardSummary {
            group_name: settings.group_name.clone(),
            total_members: members.len() as i64,
            total_savings,
            total_principal_loaned,
            loan_balance_due,
            profit,
            penalties,
            total_jamii_shortfall,
        })
    }
}
