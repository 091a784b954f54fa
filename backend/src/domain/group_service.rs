use crate::db::DbConnection;
use crate::error::{LedgerError, LedgerResult};
use crate::settings::DEFAULT_SETTINGS;
use chrono::NaiveDate;
use shared::MemberKind;
use tracing::info;

/// Bootstraps savings groups.
///
/// Creating a group also creates its expense account member and seeds the
/// default settings so the resolvers have explicit rows to read.
#[derive(Clone)]
pub struct GroupService {
    db: DbConnection,
}

impl GroupService {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    pub async fn create_group(&self, name: &str, today: NaiveDate) -> LedgerResult<i64> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::validation("group name is required"));
        }

        let mut tx = self.db.pool().begin().await?;

        let result = sqlx::query("INSERT INTO groups (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(today)
            .execute(&mut *tx)
            .await?;
        let group_id = result.last_insert_rowid();

        // The group's own expense account; receives jamii deductions and is
        // excluded from all per-member aggregates.
        sqlx::query(
            "INSERT INTO members (group_id, name, phone, joined_date, kind) VALUES (?, ?, NULL, ?, ?)",
        )
        .bind(group_id)
        .bind("Group expense account")
        .bind(today)
        .bind(MemberKind::GroupExpense.as_str())
        .execute(&mut *tx)
        .await?;

        for (key, value) in DEFAULT_SETTINGS {
            let value = if *key == "group_name" { name } else { value };
            sqlx::query("INSERT INTO settings (group_id, key, value) VALUES (?, ?, ?)")
                .bind(group_id)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!("Created group {} ({})", group_id, name);
        Ok(group_id)
    }
}
