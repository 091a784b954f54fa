use crate::db::DbConnection;
use crate::error::{LedgerError, LedgerResult};
use sqlx::Row;
use std::collections::HashMap;
use tracing::info;

/// Canonical default for every tunable. A key missing from the persisted
/// override table falls back to the value listed here.
pub const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    ("group_name", "Kikoba"),
    ("interest_rate", "0.10"),
    ("daily_penalty_amount", "1000"),
    ("leadership_pay_amount", "0"),
    ("jamii_amount", "2000"),
    ("cycle_months", "12"),
    ("loan_tier1_amount", "500000"),
    ("loan_tier1_months", "1"),
    ("loan_tier2_amount", "1000000"),
    ("loan_tier2_months", "3"),
    ("loan_tier3_amount", "2000000"),
    ("loan_tier3_months", "6"),
    ("loan_tier4_amount", "5000000"),
    ("loan_tier4_months", "9"),
];

const TIER_COUNT: usize = 4;

/// A principal bracket mapping to a fixed loan duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoanTier {
    pub max_principal: f64,
    pub months: u32,
}

/// Typed view of a group's resolved settings.
///
/// Resolved once per request; malformed stored values surface as validation
/// errors here instead of being silently defaulted.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSettings {
    pub group_name: String,
    pub interest_rate: f64,
    pub daily_penalty: f64,
    pub leadership_pay: f64,
    pub jamii_amount: f64,
    pub cycle_months: u32,
    /// Tiers in declared order; matching is first-fit, not best-fit.
    pub loan_tiers: Vec<LoanTier>,
}

impl GroupSettings {
    pub fn from_map(map: &HashMap<String, String>) -> LedgerResult<Self> {
        let mut loan_tiers = Vec::with_capacity(TIER_COUNT);
        for i in 1..=TIER_COUNT {
            loan_tiers.push(LoanTier {
                max_principal: parse_f64(map, &format!("loan_tier{}_amount", i))?,
                months: parse_u32(map, &format!("loan_tier{}_months", i))?,
            });
        }

        Ok(Self {
            group_name: map
                .get("group_name")
                .cloned()
                .unwrap_or_else(|| "Kikoba".to_string()),
            interest_rate: parse_f64(map, "interest_rate")?,
            daily_penalty: parse_f64(map, "daily_penalty_amount")?,
            leadership_pay: parse_f64(map, "leadership_pay_amount")?,
            jamii_amount: parse_f64(map, "jamii_amount")?,
            cycle_months: parse_u32(map, "cycle_months")?,
            loan_tiers,
        })
    }
}

fn parse_f64(map: &HashMap<String, String>, key: &str) -> LedgerResult<f64> {
    let raw = map
        .get(key)
        .ok_or_else(|| LedgerError::validation(format!("setting `{}` is missing", key)))?;
    raw.trim()
        .parse::<f64>()
        .map_err(|_| LedgerError::validation(format!("setting `{}` is not a number: `{}`", key, raw)))
}

fn parse_u32(map: &HashMap<String, String>, key: &str) -> LedgerResult<u32> {
    let raw = map
        .get(key)
        .ok_or_else(|| LedgerError::validation(format!("setting `{}` is missing", key)))?;
    raw.trim()
        .parse::<u32>()
        .map_err(|_| {
            LedgerError::validation(format!("setting `{}` is not an integer: `{}`", key, raw))
        })
}

/// Read/write access to per-group setting overrides.
#[derive(Clone)]
pub struct SettingsService {
    db: DbConnection,
}

impl SettingsService {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    /// Stored overrides merged over the default table, as raw strings.
    /// Read-only; no validation happens here.
    pub async fn resolve_raw(&self, group_id: i64) -> LedgerResult<HashMap<String, String>> {
        let rows = sqlx::query("SELECT key, value FROM settings WHERE group_id = ?")
            .bind(group_id)
            .fetch_all(self.db.pool())
            .await?;

        let mut map: HashMap<String, String> = DEFAULT_SETTINGS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        for row in rows {
            map.insert(row.get("key"), row.get("value"));
        }
        Ok(map)
    }

    /// The typed settings structure used by every engine.
    pub async fn resolve(&self, group_id: i64) -> LedgerResult<GroupSettings> {
        let raw = self.resolve_raw(group_id).await?;
        GroupSettings::from_map(&raw)
    }

    /// Upsert overrides; empty values are ignored rather than stored.
    pub async fn save(
        &self,
        group_id: i64,
        updates: &HashMap<String, String>,
    ) -> LedgerResult<()> {
        let mut tx = self.db.pool().begin().await?;
        for (key, value) in updates {
            if value.trim().is_empty() {
                continue;
            }
            sqlx::query("INSERT OR REPLACE INTO settings (group_id, key, value) VALUES (?, ?, ?)")
                .bind(group_id)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        info!("Saved {} setting overrides for group {}", updates.len(), group_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (DbConnection, SettingsService) {
        let db = DbConnection::init_test().await.expect("init test db");
        let service = SettingsService::new(db.clone());
        (db, service)
    }

    // Overrides reference a real group row; the FK on settings.group_id is
    // enforced.
    async fn add_group(db: &DbConnection, name: &str) -> i64 {
        crate::domain::GroupService::new(db.clone())
            .create_group(name, "2025-01-01".parse().unwrap())
            .await
            .expect("create group")
    }

    #[test]
    fn defaults_parse_into_typed_settings() {
        let map: HashMap<String, String> = DEFAULT_SETTINGS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let settings = GroupSettings::from_map(&map).unwrap();
        assert_eq!(settings.interest_rate, 0.10);
        assert_eq!(settings.daily_penalty, 1000.0);
        assert_eq!(settings.jamii_amount, 2000.0);
        assert_eq!(settings.cycle_months, 12);
        assert_eq!(settings.loan_tiers.len(), 4);
        assert_eq!(settings.loan_tiers[0].max_principal, 500_000.0);
        assert_eq!(settings.loan_tiers[0].months, 1);
        assert_eq!(settings.loan_tiers[3].months, 9);
    }

    #[test]
    fn malformed_value_is_a_validation_error() {
        let mut map: HashMap<String, String> = DEFAULT_SETTINGS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        map.insert("interest_rate".to_string(), "ten percent".to_string());

        let err = GroupSettings::from_map(&map).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn missing_keys_fall_back_to_defaults() {
        let (_db, service) = setup().await;

        // No group, no stored rows: pure defaults.
        let raw = service.resolve_raw(1).await.unwrap();
        assert_eq!(raw.get("interest_rate").unwrap(), "0.10");
        assert_eq!(raw.get("daily_penalty_amount").unwrap(), "1000");
    }

    #[tokio::test]
    async fn overrides_win_over_defaults() {
        let (db, service) = setup().await;
        let group_id = add_group(&db, "Kikoba").await;

        let mut updates = HashMap::new();
        updates.insert("interest_rate".to_string(), "0.15".to_string());
        updates.insert("group_name".to_string(), "Upendo".to_string());
        // Empty values must not overwrite anything.
        updates.insert("jamii_amount".to_string(), "".to_string());
        service.save(group_id, &updates).await.unwrap();

        let settings = service.resolve(group_id).await.unwrap();
        assert_eq!(settings.interest_rate, 0.15);
        assert_eq!(settings.group_name, "Upendo");
        assert_eq!(settings.jamii_amount, 2000.0);
    }

    #[tokio::test]
    async fn overrides_are_scoped_per_group() {
        let (db, service) = setup().await;
        let first = add_group(&db, "Umoja").await;
        let second = add_group(&db, "Upendo").await;

        let mut updates = HashMap::new();
        updates.insert("interest_rate".to_string(), "0.20".to_string());
        service.save(first, &updates).await.unwrap();

        assert_eq!(service.resolve(first).await.unwrap().interest_rate, 0.20);
        assert_eq!(service.resolve(second).await.unwrap().interest_rate, 0.10);
    }
}
