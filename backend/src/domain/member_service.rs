use crate::db::DbConnection;
use crate::error::{LedgerError, LedgerResult};
use chrono::NaiveDate;
use shared::{CreateMemberRequest, Member, MemberKind, UpdateMemberRequest};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{info, warn};

pub(crate) fn member_from_row(row: &SqliteRow) -> LedgerResult<Member> {
    let kind: String = row.get("kind");
    Ok(Member {
        id: row.get("id"),
        group_id: row.get("group_id"),
        name: row.get("name"),
        phone: row.get("phone"),
        joined_date: row.get("joined_date"),
        kind: kind
            .parse::<MemberKind>()
            .map_err(LedgerError::Validation)?,
    })
}

/// Member registry: registration, edits and guarded deletion.
#[derive(Clone)]
pub struct MemberService {
    db: DbConnection,
}

impl MemberService {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    pub async fn get_member(&self, group_id: i64, member_id: i64) -> LedgerResult<Member> {
        let row = sqlx::query("SELECT * FROM members WHERE id = ? AND group_id = ?")
            .bind(member_id)
            .bind(group_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(LedgerError::NotFound("member"))?;
        member_from_row(&row)
    }

    /// The member a financial record may be attached to by an operator.
    /// Rejects the group expense account, which only receives
    /// system-generated rows.
    pub async fn require_person(&self, group_id: i64, member_id: i64) -> LedgerResult<Member> {
        let member = self.get_member(group_id, member_id).await?;
        if member.kind != MemberKind::Person {
            return Err(LedgerError::validation(
                "the group expense account cannot hold member records",
            ));
        }
        Ok(member)
    }

    /// The group's reserved expense account.
    pub async fn expense_account_id(&self, group_id: i64) -> LedgerResult<i64> {
        let row = sqlx::query(
            "SELECT id FROM members WHERE group_id = ? AND kind = 'group_expense'",
        )
        .bind(group_id)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or(LedgerError::NotFound("group expense account"))?;
        Ok(row.get("id"))
    }

    /// All person members, ordered by name. The expense account never
    /// appears in listings.
    pub async fn list_members(&self, group_id: i64) -> LedgerResult<Vec<Member>> {
        let rows = sqlx::query(
            "SELECT * FROM members WHERE group_id = ? AND kind = 'person' ORDER BY name",
        )
        .bind(group_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(member_from_row).collect()
    }

    pub async fn create_member(
        &self,
        group_id: i64,
        request: CreateMemberRequest,
        today: NaiveDate,
    ) -> LedgerResult<Member> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(LedgerError::validation("member name is required"));
        }

        let result = sqlx::query(
            "INSERT INTO members (group_id, name, phone, joined_date, kind) VALUES (?, ?, ?, ?, 'person')",
        )
        .bind(group_id)
        .bind(name)
        .bind(&request.phone)
        .bind(today)
        .execute(self.db.pool())
        .await?;

        let member_id = result.last_insert_rowid();
        info!("Registered member {} ({}) in group {}", member_id, name, group_id);
        self.get_member(group_id, member_id).await
    }

    pub async fn update_member(
        &self,
        group_id: i64,
        member_id: i64,
        request: UpdateMemberRequest,
    ) -> LedgerResult<Member> {
        let member = self.get_member(group_id, member_id).await?;
        if member.kind == MemberKind::GroupExpense {
            return Err(LedgerError::integrity(
                "the group expense account cannot be modified",
            ));
        }

        let name = request.name.trim();
        if name.is_empty() {
            return Err(LedgerError::validation("member name is required"));
        }

        sqlx::query("UPDATE members SET name = ?, phone = ? WHERE id = ? AND group_id = ?")
            .bind(name)
            .bind(&request.phone)
            .bind(member_id)
            .bind(group_id)
            .execute(self.db.pool())
            .await?;

        self.get_member(group_id, member_id).await
    }

    /// Delete a member. Allowed only when the member holds no
    /// contributions, loans or penalties.
    pub async fn delete_member(&self, group_id: i64, member_id: i64) -> LedgerResult<()> {
        let member = self.get_member(group_id, member_id).await?;
        if member.kind == MemberKind::GroupExpense {
            return Err(LedgerError::integrity(
                "the group expense account cannot be deleted",
            ));
        }

        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM contributions WHERE member_id = ? AND group_id = ?) +
                (SELECT COUNT(*) FROM loans WHERE member_id = ? AND group_id = ?) +
                (SELECT COUNT(*) FROM penalties WHERE member_id = ? AND group_id = ?) AS dependents
            "#,
        )
        .bind(member_id)
        .bind(group_id)
        .bind(member_id)
        .bind(group_id)
        .bind(member_id)
        .bind(group_id)
        .fetch_one(self.db.pool())
        .await?;

        let dependents: i64 = row.get("dependents");
        if dependents > 0 {
            warn!(
                "Refused to delete member {}: {} dependent records",
                member_id, dependents
            );
            return Err(LedgerError::integrity(
                "cannot delete a member with existing contributions, loans, or penalties",
            ));
        }

        sqlx::query("DELETE FROM members WHERE id = ? AND group_id = ?")
            .bind(member_id)
            .bind(group_id)
            .execute(self.db.pool())
            .await?;

        info!("Deleted member {} from group {}", member_id, group_id);
        Ok(())
    }
}
