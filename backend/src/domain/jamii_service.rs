use crate::db::DbConnection;
use crate::error::LedgerResult;
use crate::settings::GroupSettings;
use shared::{ContributionKind, JamiiStatus};
use sqlx::Row;

/// Jamii tracker: the mandatory social-fund expectation and each member's
/// position against it.
#[derive(Clone)]
pub struct JamiiService {
    db: DbConnection,
}

impl JamiiService {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    /// A member's jamii position. The expectation is flat for the whole
    /// cycle and deliberately ignores the join date: every member is
    /// expected to reach the full cycle total regardless of tenure.
    pub async fn member_status(
        &self,
        group_id: i64,
        member_id: i64,
        settings: &GroupSettings,
    ) -> LedgerResult<JamiiStatus> {
        let expected_total = settings.jamii_amount * f64::from(settings.cycle_months);

        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0.0) AS total FROM contributions WHERE group_id = ? AND member_id = ? AND type = ?",
        )
        .bind(group_id)
        .bind(member_id)
        .bind(ContributionKind::Jamii.as_str())
        .fetch_one(self.db.pool())
        .await?;
        let total_paid: f64 = row.get("total");

        Ok(JamiiStatus {
            expected_total,
            total_paid,
            shortfall: (expected_total - total_paid).max(0.0),
        })
    }

    /// Positive jamii collected across the group. Deduction rows carry a
    /// different type, so they never net this figure down.
    pub async fn total_collected(&self, group_id: i64) -> LedgerResult<f64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0.0) AS total FROM contributions WHERE group_id = ? AND type = ? AND amount > 0",
        )
        .bind(group_id)
        .bind(ContributionKind::Jamii.as_str())
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.get("total"))
    }

    /// Historical jamii fund draws, stored negative, reported as a negative
    /// sum here. Callers take the absolute value when presenting it as an
    /// expense line.
    pub async fn total_spent(&self, group_id: i64) -> LedgerResult<f64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0.0) AS total FROM contributions WHERE group_id = ? AND type = ?",
        )
        .bind(group_id)
        .bind(ContributionKind::JamiiDeduction.as_str())
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.get("total"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::contribution_service::ContributionService;
    use crate::domain::group_service::GroupService;
    use crate::domain::member_service::MemberService;
    use crate::settings::SettingsService;
    use chrono::NaiveDate;
    use shared::{CreateContributionRequest, CreateMemberRequest};

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    async fn setup() -> (DbConnection, i64, i64, GroupSettings) {
        let db = DbConnection::init_test().await.unwrap();
        let group_id = GroupService::new(db.clone())
            .create_group("Test Group", date("2025-01-01"))
            .await
            .unwrap();
        let member = MemberService::new(db.clone())
            .create_member(
                group_id,
                CreateMemberRequest { name: "Halima".to_string(), phone: None },
                date("2025-06-01"),
            )
            .await
            .unwrap();
        let settings = SettingsService::new(db.clone()).resolve(group_id).await.unwrap();
        (db, group_id, member.id, settings)
    }

    #[tokio::test]
    async fn expectation_is_flat_regardless_of_join_date() {
        let (db, group_id, member_id, settings) = setup().await;
        let service = JamiiService::new(db);

        // Joined mid-year, yet expected the full 2,000 * 12.
        let status = service.member_status(group_id, member_id, &settings).await.unwrap();
        assert_eq!(status.expected_total, 24_000.0);
        assert_eq!(status.total_paid, 0.0);
        assert_eq!(status.shortfall, 24_000.0);
    }

    #[tokio::test]
    async fn shortfall_floors_at_zero_on_overpayment() {
        let (db, group_id, member_id, settings) = setup().await;
        let contributions = ContributionService::new(db.clone());
        let service = JamiiService::new(db);

        contributions
            .record_contribution(
                group_id,
                CreateContributionRequest {
                    member_id,
                    kind: "jamii".to_string(),
                    amount: 30_000.0,
                },
                date("2025-07-01"),
            )
            .await
            .unwrap();

        let status = service.member_status(group_id, member_id, &settings).await.unwrap();
        assert_eq!(status.total_paid, 30_000.0);
        assert_eq!(status.shortfall, 0.0);
    }

    #[tokio::test]
    async fn deductions_do_not_reduce_collected_total() {
        let (db, group_id, member_id, _settings) = setup().await;
        let contributions = ContributionService::new(db.clone());
        let service = JamiiService::new(db);

        contributions
            .record_contribution(
                group_id,
                CreateContributionRequest {
                    member_id,
                    kind: "jamii".to_string(),
                    amount: 10_000.0,
                },
                date("2025-07-01"),
            )
            .await
            .unwrap();
        contributions
            .record_jamii_deduction(group_id, 4_000.0, date("2025-07-15"))
            .await
            .unwrap();

        assert_eq!(service.total_collected(group_id).await.unwrap(), 10_000.0);
        assert_eq!(service.total_spent(group_id).await.unwrap(), -4_000.0);
    }
}
