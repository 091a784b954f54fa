use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Account kind carried on every member row.
///
/// Each group owns exactly one `GroupExpense` account. It is not a real
/// person: it receives system-generated jamii deductions, is excluded from
/// every per-member aggregate and can never be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Person,
    GroupExpense,
}

impl MemberKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberKind::Person => "person",
            MemberKind::GroupExpense => "group_expense",
        }
    }
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "person" => Ok(MemberKind::Person),
            "group_expense" => Ok(MemberKind::GroupExpense),
            other => Err(format!("unknown member kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    pub group_id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub joined_date: NaiveDate,
    pub kind: MemberKind,
}

/// Ledger classification of a contribution row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionKind {
    /// Regular savings/equity contribution.
    Hisa,
    /// Initial/founding savings, aggregated with hisa for the savings base.
    HisaAnzia,
    /// Mandatory periodic social-fund contribution.
    Jamii,
    /// System-generated group expense draw, stored with a negative amount.
    JamiiDeduction,
    /// Audit-trail record of a penalty payment.
    PenaltyPayment,
}

impl ContributionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContributionKind::Hisa => "hisa",
            ContributionKind::HisaAnzia => "hisa anzia",
            ContributionKind::Jamii => "jamii",
            ContributionKind::JamiiDeduction => "jamii_deduction",
            ContributionKind::PenaltyPayment => "penalty_payment",
        }
    }

    /// System-generated rows are immutable through the operator paths.
    pub fn is_system_generated(&self) -> bool {
        matches!(
            self,
            ContributionKind::JamiiDeduction | ContributionKind::PenaltyPayment
        )
    }
}

impl fmt::Display for ContributionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContributionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hisa" => Ok(ContributionKind::Hisa),
            "hisa anzia" => Ok(ContributionKind::HisaAnzia),
            "jamii" => Ok(ContributionKind::Jamii),
            "jamii_deduction" => Ok(ContributionKind::JamiiDeduction),
            "penalty_payment" => Ok(ContributionKind::PenaltyPayment),
            other => Err(format!("unknown contribution type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub id: i64,
    pub group_id: i64,
    pub member_id: i64,
    pub kind: ContributionKind,
    pub amount: f64,
    pub date: NaiveDate,
}

/// Contribution row joined with the member's name for listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionView {
    pub id: i64,
    pub member_id: i64,
    pub member_name: String,
    pub kind: ContributionKind,
    pub amount: f64,
    pub date: NaiveDate,
}

/// Derived loan state. Stored as a cache but always recomputable from the
/// repayment ledger and the current date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanStatus {
    Active,
    Overdue,
    Cleared,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Active => "Active",
            LoanStatus::Overdue => "Overdue",
            LoanStatus::Cleared => "Cleared",
        }
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(LoanStatus::Active),
            "Overdue" => Ok(LoanStatus::Overdue),
            "Cleared" => Ok(LoanStatus::Cleared),
            other => Err(format!("unknown loan status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id: i64,
    pub group_id: i64,
    pub member_id: i64,
    pub principal: f64,
    /// Computed once at creation as round(principal * interest_rate).
    pub interest: f64,
    /// principal + interest; immutable for accounting integrity.
    pub total: f64,
    pub start_date: NaiveDate,
    pub due_date: NaiveDate,
    pub status: LoanStatus,
}

/// Loan joined with its repayment position for listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanView {
    pub id: i64,
    pub member_id: i64,
    pub member_name: String,
    pub principal: f64,
    pub interest: f64,
    pub total: f64,
    pub start_date: NaiveDate,
    pub due_date: NaiveDate,
    pub repaid: f64,
    pub remaining: f64,
    pub status: LoanStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repayment {
    pub id: i64,
    pub group_id: i64,
    pub loan_id: i64,
    pub amount: f64,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Penalty {
    pub id: i64,
    pub group_id: i64,
    pub member_id: i64,
    /// Set for auto-generated loan-lateness penalties, absent for manual ones.
    pub loan_id: Option<i64>,
    pub penalty_type: String,
    pub amount: f64,
    pub amount_paid: f64,
    pub description: String,
    pub date: NaiveDate,
}

/// Penalty row joined with the member's name for the ledger listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyView {
    pub id: i64,
    pub member_id: i64,
    pub member_name: String,
    pub loan_id: Option<i64>,
    pub penalty_type: String,
    pub amount: f64,
    pub amount_paid: f64,
    pub description: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyLedger {
    pub total_outstanding: f64,
    pub ledger: Vec<PenaltyView>,
}

/// Group- or member-level penalty aggregate. For any consistent snapshot
/// `outstanding == imposed - paid`, but all three are computed independently
/// from the store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PenaltyTotals {
    pub imposed: f64,
    pub paid: f64,
    pub outstanding: f64,
}

/// Result of applying a payment against a penalty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PenaltyPaymentReceipt {
    pub penalty_id: i64,
    /// Amount actually applied; over-payment is capped at the remaining due.
    pub applied: f64,
    pub amount_paid: f64,
    pub remaining_due: f64,
}

/// A member's mandatory-savings position. The expectation is flat for the
/// whole cycle and deliberately ignores the join date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JamiiStatus {
    pub expected_total: f64,
    pub total_paid: f64,
    pub shortfall: f64,
}

/// A member's loan position within the group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemberLoanBalances {
    pub total_committed: f64,
    pub total_repaid: f64,
    pub remaining: f64,
    /// Remaining balance on loans already past due.
    pub overdue_remaining: f64,
}

/// The group-wide profit pool, gross and net.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitStatement {
    pub total_interest: f64,
    pub total_penalties_imposed: f64,
    pub total_penalties_paid: f64,
    /// jamii_amount * cycle_months * member count; counted as realized
    /// income regardless of actual collection.
    pub expected_jamii_total: f64,
    pub total_jamii_collected: f64,
    /// Absolute value of historical jamii_deduction draws.
    pub historical_jamii_spent: f64,
    pub unused_jamii_balance: f64,
    pub leadership_pay: f64,
    pub gross_distributable_pool: f64,
    pub net_profit_pool: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberPayout {
    pub member_id: i64,
    pub member_name: String,
    pub savings: f64,
    pub profit_share: f64,
    pub loan_balance_due: f64,
    pub penalties_due: f64,
    pub jamii_shortfall: f64,
    pub total_deductions: f64,
    pub final_payout: f64,
}

/// End-of-cycle distribution, including the what-if jamii expense applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionReport {
    pub gross_distributable_pool: f64,
    pub leadership_pay: f64,
    pub historical_jamii_spent: f64,
    pub proposed_jamii_expense: f64,
    pub total_jamii_expense: f64,
    pub net_profit: f64,
    pub total_savings: f64,
    pub breakdown: Vec<MemberPayout>,
}

/// Per-member roll-up shown on the members page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSummary {
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub total_contributions: f64,
    pub savings: f64,
    pub total_loans_committed: f64,
    pub loans_outstanding: f64,
    pub penalties_due: f64,
    pub jamii: JamiiStatus,
}

/// Full per-member position for report rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberStatement {
    pub member_id: i64,
    pub member_name: String,
    pub hisa: f64,
    pub hisa_anzia: f64,
    pub jamii_paid: f64,
    pub total_contributions: f64,
    pub total_loans: f64,
    pub total_repaid: f64,
    pub remaining_loans: f64,
    pub overdue_balance: f64,
    pub penalties_due: f64,
    pub jamii: JamiiStatus,
    pub net_contribution_position: f64,
    pub expected_profit_share: f64,
    pub net_payout: f64,
}

/// Group-wide snapshot for the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub group_name: String,
    pub total_members: i64,
    pub total_savings: f64,
    pub total_principal_loaned: f64,
    pub loan_balance_due: f64,
    pub profit: ProfitStatement,
    pub penalties: PenaltyTotals,
    pub total_jamii_shortfall: f64,
}

// ---- Request payloads ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMemberRequest {
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateMemberRequest {
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateContributionRequest {
    pub member_id: i64,
    /// A contribution type name, or "rejesho" to route the amount to the
    /// member's newest open loan as a repayment.
    pub kind: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateContributionRequest {
    pub kind: String,
    pub amount: f64,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JamiiDeductionRequest {
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateLoanRequest {
    pub member_id: i64,
    pub principal: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateLoanRequest {
    pub due_date: NaiveDate,
    pub status: LoanStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRepaymentRequest {
    pub loan_id: i64,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePenaltyRequest {
    pub member_id: i64,
    pub penalty_type: String,
    pub amount: f64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePenaltyRequest {
    pub amount: f64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyPaymentRequest {
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionRequest {
    #[serde(default)]
    pub proposed_jamii_expense: f64,
}
