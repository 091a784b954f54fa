use crate::db::DbConnection;
use crate::domain::jamii_service::JamiiService;
use crate::domain::penalty_service::PenaltyService;
use crate::error::LedgerResult;
use crate::settings::GroupSettings;
use shared::ProfitStatement;
use sqlx::Row;

/// Profit pool calculator.
///
/// The gross pool counts the EXPECTED jamii total as a revenue line, not
/// the collected total: the group's mandatory-savings obligation is treated
/// as realized income for distribution purposes regardless of collection.
#[derive(Clone)]
pub struct ProfitService {
    db: DbConnection,
    penalties: PenaltyService,
    jamii: JamiiService,
}

impl ProfitService {
    pub fn new(db: DbConnection) -> Self {
        let penalties = PenaltyService::new(db.clone());
        let jamii = JamiiService::new(db.clone());
        Self { db, penalties, jamii }
    }

    pub async fn current_group_profit(
        &self,
        group_id: i64,
        settings: &GroupSettings,
    ) -> LedgerResult<ProfitStatement> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(total - principal), 0.0) AS interest FROM loans WHERE group_id = ?",
        )
        .bind(group_id)
        .fetch_one(self.db.pool())
        .await?;
        let total_interest: f64 = row.get("interest");

        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM members WHERE group_id = ? AND kind = 'person'",
        )
        .bind(group_id)
        .fetch_one(self.db.pool())
        .await?;
        let member_count: i64 = row.get("n");

        let penalty_totals = self.penalties.group_totals(group_id).await?;
        let total_jamii_collected = self.jamii.total_collected(group_id).await?;
        // Stored negative; nets the collected pool down.
        let jamii_spent = self.jamii.total_spent(group_id).await?;
        let historical_jamii_spent = jamii_spent.abs();

        let expected_jamii_total =
            settings.jamii_amount * f64::from(settings.cycle_months) * member_count as f64;
        let unused_jamii_balance = (total_jamii_collected + jamii_spent).max(0.0);

        let gross_distributable_pool =
            total_interest + penalty_totals.imposed + expected_jamii_total;
        let net_profit_pool =
            (gross_distributable_pool - settings.leadership_pay - historical_jamii_spent).max(0.0);

        Ok(ProfitStatement {
            total_interest,
            total_penalties_imposed: penalty_totals.imposed,
            total_penalties_paid: penalty_totals.paid,
            expected_jamii_total,
            total_jamii_collected,
            historical_jamii_spent,
            unused_jamii_balance,
            leadership_pay: settings.leadership_pay,
            gross_distributable_pool,
            net_profit_pool,
        })
    }
}
