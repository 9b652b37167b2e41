//! Loan domain types

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::models::amount;

/// Which book a loan belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "loan_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LoanKind {
    Repayment,
    Funding,
}

impl LoanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanKind::Repayment => "repayment",
            LoanKind::Funding => "funding",
        }
    }
}

impl fmt::Display for LoanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoanKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "repayment" => Ok(LoanKind::Repayment),
            "funding" => Ok(LoanKind::Funding),
            other => Err(format!(
                "unknown loan kind '{}', expected repayment or funding",
                other
            )),
        }
    }
}

/// UI-facing status derived from on-chain fields and the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "loan_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Pending,
    Active,
    Overdue,
    Repaid,
    Expired,
    Funded,
}

impl LoanStatus {
    /// Position in the lifecycle; a loan's status never moves to a lower rank.
    pub fn rank(&self) -> u8 {
        match self {
            LoanStatus::Pending => 0,
            LoanStatus::Active => 1,
            LoanStatus::Overdue | LoanStatus::Expired => 2,
            LoanStatus::Repaid | LoanStatus::Funded => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoanStatus::Repaid | LoanStatus::Funded | LoanStatus::Expired
        )
    }
}

/// Interest-bearing loan from the repayment book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepaymentLoan {
    pub id: u64,
    pub borrower: Address,
    #[serde(with = "amount")]
    pub principal: U256,
    /// Whole percent
    pub interest_rate: u64,
    /// Unix seconds
    pub repayment_deadline: u64,
    #[serde(with = "amount")]
    pub total_repayment_amount: U256,
    #[serde(with = "amount")]
    pub amount_repaid: U256,
    pub is_approved: bool,
    pub is_repaid: bool,
}

impl RepaymentLoan {
    pub fn outstanding(&self) -> U256 {
        self.total_repayment_amount
            .saturating_sub(self.amount_repaid)
    }
}

/// A lender's aggregate contribution to a funding loan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lender {
    pub address: Address,
    #[serde(with = "amount")]
    pub amount: U256,
}

/// Donation-funded loan from the funding book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingLoan {
    pub id: u64,
    pub borrower: Address,
    pub title: String,
    pub description: String,
    #[serde(with = "amount")]
    pub amount_required: U256,
    /// Unix seconds; donations are accepted strictly before it
    pub deadline: u64,
    #[serde(with = "amount")]
    pub amount_collected: U256,
    pub document_link: String,
    pub lenders: Vec<Lender>,
    pub approved: bool,
}

impl FundingLoan {
    pub fn is_funded(&self) -> bool {
        self.amount_collected >= self.amount_required
    }

    pub fn shortfall(&self) -> U256 {
        self.amount_required.saturating_sub(self.amount_collected)
    }
}

/// A loan as read from the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Loan {
    Repayment(RepaymentLoan),
    Funding(FundingLoan),
}

impl Loan {
    pub fn id(&self) -> u64 {
        match self {
            Loan::Repayment(l) => l.id,
            Loan::Funding(l) => l.id,
        }
    }

    pub fn kind(&self) -> LoanKind {
        match self {
            Loan::Repayment(_) => LoanKind::Repayment,
            Loan::Funding(_) => LoanKind::Funding,
        }
    }

    pub fn borrower(&self) -> Address {
        match self {
            Loan::Repayment(l) => l.borrower,
            Loan::Funding(l) => l.borrower,
        }
    }

    pub fn is_approved(&self) -> bool {
        match self {
            Loan::Repayment(l) => l.is_approved,
            Loan::Funding(l) => l.approved,
        }
    }

    pub fn deadline(&self) -> u64 {
        match self {
            Loan::Repayment(l) => l.repayment_deadline,
            Loan::Funding(l) => l.deadline,
        }
    }
}

/// Kinds of mirrored contract events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "loan_event_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LoanEventType {
    Created,
    Donated,
    Funded,
}

/// Mirrored contract event, unique per (transaction hash, event type)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanEvent {
    pub event_type: LoanEventType,
    pub contract: Address,
    pub loan_id: u64,
    pub transaction_hash: String,
    pub block_number: Option<u64>,
    pub data: serde_json::Value,
}

/// Mirrored donation, unique per `(transaction hash, log index)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanDonation {
    pub contract: Address,
    pub loan_id: u64,
    pub lender: Address,
    #[serde(with = "amount")]
    pub amount: U256,
    pub transaction_hash: String,
    /// Position of the `DonatedToLoan` log within its transaction
    pub log_index: u64,
    pub block_number: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loan_serializes_with_kind_tag() {
        let loan = Loan::Funding(FundingLoan {
            id: 0,
            borrower: Address::repeat_byte(1),
            title: "School fees".to_string(),
            description: String::new(),
            amount_required: U256::from(900u64),
            deadline: 10,
            amount_collected: U256::from(300u64),
            document_link: String::new(),
            lenders: Vec::new(),
            approved: true,
        });

        let json = serde_json::to_value(&loan).unwrap();
        assert_eq!(json["kind"], "funding");
        assert_eq!(json["amountRequired"], "900");

        let back: Loan = serde_json::from_value(json).unwrap();
        assert_eq!(back, loan);
    }

    #[test]
    fn test_outstanding_never_underflows() {
        let loan = RepaymentLoan {
            id: 1,
            borrower: Address::ZERO,
            principal: U256::from(1000u64),
            interest_rate: 5,
            repayment_deadline: 0,
            total_repayment_amount: U256::from(1050u64),
            amount_repaid: U256::from(2000u64),
            is_approved: true,
            is_repaid: true,
        };
        assert_eq!(loan.outstanding(), U256::ZERO);
    }

    #[test]
    fn test_loan_kind_parses() {
        assert_eq!("Funding".parse::<LoanKind>().unwrap(), LoanKind::Funding);
        assert_eq!(" repayment ".parse::<LoanKind>().unwrap(), LoanKind::Repayment);
        assert!("escrow".parse::<LoanKind>().is_err());
    }

    #[test]
    fn test_status_rank_orders_lifecycle() {
        assert!(LoanStatus::Pending.rank() < LoanStatus::Active.rank());
        assert!(LoanStatus::Active.rank() < LoanStatus::Overdue.rank());
        assert!(LoanStatus::Overdue.rank() < LoanStatus::Repaid.rank());
        assert!(LoanStatus::Funded.is_terminal());
        assert!(!LoanStatus::Overdue.is_terminal());
    }
}
