//! Contract bindings for both loan books

use alloy_primitives::U256;
use alloy_sol_types::sol;

use super::GatewayError;
use crate::loan::{FundingLoan, Lender, RepaymentLoan};

sol! {
    /// Interest-bearing loans approved by the owner and repaid by the borrower
    interface IRepaymentLoans {
        function owner() external view returns (address);
        function loanCounter() external view returns (uint256);
        function loans(uint256 loanId) external view returns (
            uint256 id,
            address borrower,
            uint256 amount,
            uint256 interestRate,
            uint256 repaymentDeadline,
            uint256 totalRepaymentAmount,
            uint256 amountRepaid,
            bool isApproved,
            bool isRepaid
        );
        function borrowerLoans(address borrower) external view returns (uint256[] memory);

        function requestLoan(uint256 amount, uint256 interestRate, uint256 repaymentPeriod) external;
        function approveLoan(uint256 loanId) external;
        function repayLoan(uint256 loanId) external payable;
        function applyPenalty(uint256 loanId) external;
    }
}

sol! {
    /// Loans crowd-funded by donations until a deadline
    interface IFundingLoans {
        struct FundingLoanRecord {
            address borrower;
            string title;
            string description;
            uint256 amountRequired;
            uint256 deadline;
            uint256 amountCollected;
            string documentLink;
            address[] lenders;
            uint256[] donations;
            bool approved;
        }

        event LoanCreated(uint256 indexed loanId, address indexed borrower, string title, uint256 amountRequired);
        event DonatedToLoan(uint256 indexed loanId, address indexed donor, uint256 amount);
        event LoanFunded(uint256 indexed loanId, address indexed borrower, uint256 totalAmount);

        function owner() external view returns (address);
        function numberOfLoans() external view returns (uint256);
        function getAllLoans(uint256 start, uint256 count) external view returns (FundingLoanRecord[] memory);
        function getLenders(uint256 loanId) external view returns (address[] memory, uint256[] memory);

        function createLoan(
            string memory title,
            string memory description,
            uint256 amountRequired,
            uint256 deadline,
            string memory documentLink
        ) external returns (uint256);
        function approveLoan(uint256 loanId) external;
        function donateToLoan(uint256 loanId) external payable;
    }
}

/// Narrow a chain integer, failing on overflow instead of truncating
pub(crate) fn to_u64(value: U256, field: &str) -> Result<u64, GatewayError> {
    u64::try_from(value)
        .map_err(|_| GatewayError::Decode(format!("{} does not fit in u64: {}", field, value)))
}

pub(crate) fn repayment_loan(
    raw: IRepaymentLoans::loansReturn,
) -> Result<RepaymentLoan, GatewayError> {
    Ok(RepaymentLoan {
        id: to_u64(raw.id, "id")?,
        borrower: raw.borrower,
        principal: raw.amount,
        interest_rate: to_u64(raw.interestRate, "interestRate")?,
        repayment_deadline: to_u64(raw.repaymentDeadline, "repaymentDeadline")?,
        total_repayment_amount: raw.totalRepaymentAmount,
        amount_repaid: raw.amountRepaid,
        is_approved: raw.isApproved,
        is_repaid: raw.isRepaid,
    })
}

pub(crate) fn lenders(addresses: Vec<alloy_primitives::Address>, amounts: Vec<U256>) -> Vec<Lender> {
    addresses
        .into_iter()
        .zip(amounts)
        .map(|(address, amount)| Lender { address, amount })
        .collect()
}

pub(crate) fn funding_loan(
    id: u64,
    raw: IFundingLoans::FundingLoanRecord,
) -> Result<FundingLoan, GatewayError> {
    Ok(FundingLoan {
        id,
        borrower: raw.borrower,
        title: raw.title,
        description: raw.description,
        amount_required: raw.amountRequired,
        deadline: to_u64(raw.deadline, "deadline")?,
        amount_collected: raw.amountCollected,
        document_link: raw.documentLink,
        lenders: lenders(raw.lenders, raw.donations),
        approved: raw.approved,
    })
}
