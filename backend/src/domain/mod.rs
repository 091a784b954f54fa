pub mod contribution_service;
pub mod group_service;
pub mod jamii_service;
pub mod loan_service;
pub mod member_service;
pub mod penalty_service;
pub mod profit_service;
pub mod report_service;

pub use contribution_service::ContributionService;
pub use group_service::GroupService;
pub use jamii_service::JamiiService;
pub use loan_service::LoanService;
pub use member_service::MemberService;
pub use penalty_service::PenaltyService;
pub use profit_service::ProfitService;
pub use report_service::ReportService;
