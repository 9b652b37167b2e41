//! Pure projection of on-chain loans into UI-facing views

use alloy_primitives::{Address, U256};
use serde::Serialize;

use super::model::{FundingLoan, Loan, LoanStatus, RepaymentLoan};
use crate::models::amount;

/// What the presentation layer renders for a loan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanView {
    pub id: u64,
    pub borrower: Address,
    pub status: LoanStatus,
    pub approved: bool,
    pub deadline: u64,
    #[serde(with = "amount")]
    pub remaining_amount: U256,
    pub progress_percent: u8,
    pub detail: LoanDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum LoanDetail {
    Repayment {
        #[serde(with = "amount")]
        principal: U256,
        interest_rate: u64,
        #[serde(with = "amount")]
        total_repayment_amount: U256,
        #[serde(with = "amount")]
        amount_repaid: U256,
        is_repaid: bool,
    },
    Funding {
        title: String,
        description: String,
        document_link: String,
        #[serde(with = "amount")]
        amount_required: U256,
        #[serde(with = "amount")]
        amount_collected: U256,
        is_funded: bool,
        lender_count: usize,
    },
}

/// floor(done * 100 / total), 0 when total is 0, capped at 100
pub fn progress_percent(done: U256, total: U256) -> u8 {
    if total.is_zero() {
        return 0;
    }
    let percent = done.saturating_mul(U256::from(100u8)) / total;
    percent.min(U256::from(100u8)).to::<u8>()
}

pub fn repayment_status(loan: &RepaymentLoan, now: u64) -> LoanStatus {
    if loan.is_repaid {
        LoanStatus::Repaid
    } else if !loan.is_approved {
        LoanStatus::Pending
    } else if loan.repayment_deadline < now {
        LoanStatus::Overdue
    } else {
        LoanStatus::Active
    }
}

pub fn funding_status(loan: &FundingLoan, now: u64) -> LoanStatus {
    if loan.is_funded() {
        LoanStatus::Funded
    } else if loan.deadline < now {
        LoanStatus::Expired
    } else if !loan.approved {
        LoanStatus::Pending
    } else {
        LoanStatus::Active
    }
}

pub fn status(loan: &Loan, now: u64) -> LoanStatus {
    match loan {
        Loan::Repayment(l) => repayment_status(l, now),
        Loan::Funding(l) => funding_status(l, now),
    }
}

/// Project a loan at time `now` (unix seconds)
pub fn project(loan: &Loan, now: u64) -> LoanView {
    match loan {
        Loan::Repayment(l) => LoanView {
            id: l.id,
            borrower: l.borrower,
            status: repayment_status(l, now),
            approved: l.is_approved,
            deadline: l.repayment_deadline,
            remaining_amount: l.outstanding(),
            progress_percent: progress_percent(l.amount_repaid, l.total_repayment_amount),
            detail: LoanDetail::Repayment {
                principal: l.principal,
                interest_rate: l.interest_rate,
                total_repayment_amount: l.total_repayment_amount,
                amount_repaid: l.amount_repaid,
                is_repaid: l.is_repaid,
            },
        },
        Loan::Funding(l) => LoanView {
            id: l.id,
            borrower: l.borrower,
            status: funding_status(l, now),
            approved: l.approved,
            deadline: l.deadline,
            remaining_amount: l.shortfall(),
            progress_percent: progress_percent(l.amount_collected, l.amount_required),
            detail: LoanDetail::Funding {
                title: l.title.clone(),
                description: l.description.clone(),
                document_link: l.document_link.clone(),
                amount_required: l.amount_required,
                amount_collected: l.amount_collected,
                is_funded: l.is_funded(),
                lender_count: l.lenders.len(),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;
    const DAY: u64 = 86_400;

    fn repayment(total: u64, repaid: u64, deadline: u64, approved: bool) -> RepaymentLoan {
        RepaymentLoan {
            id: 1,
            borrower: Address::repeat_byte(0xb0),
            principal: U256::from(1000u64),
            interest_rate: 5,
            repayment_deadline: deadline,
            total_repayment_amount: U256::from(total),
            amount_repaid: U256::from(repaid),
            is_approved: approved,
            is_repaid: total > 0 && repaid >= total,
        }
    }

    fn funding(required: u64, collected: u64, deadline: u64, approved: bool) -> FundingLoan {
        FundingLoan {
            id: 0,
            borrower: Address::repeat_byte(0xb0),
            title: "Stock for shop".to_string(),
            description: String::new(),
            amount_required: U256::from(required),
            deadline,
            amount_collected: U256::from(collected),
            document_link: String::new(),
            lenders: Vec::new(),
            approved,
        }
    }

    #[test]
    fn test_approved_loan_within_deadline_is_active() {
        let loan = Loan::Repayment(repayment(1050, 0, NOW + 30 * DAY, true));
        let view = project(&loan, NOW);

        assert_eq!(view.status, LoanStatus::Active);
        assert_eq!(view.remaining_amount, U256::from(1050u64));
        assert_eq!(view.progress_percent, 0);
    }

    #[test]
    fn test_full_repayment_is_repaid() {
        let loan = Loan::Repayment(repayment(1050, 1050, NOW + 30 * DAY, true));
        let view = project(&loan, NOW);

        assert_eq!(view.status, LoanStatus::Repaid);
        assert_eq!(view.remaining_amount, U256::ZERO);
        assert_eq!(view.progress_percent, 100);
    }

    #[test]
    fn test_past_deadline_is_overdue() {
        let loan = Loan::Repayment(repayment(1050, 0, NOW - 1, true));
        assert_eq!(project(&loan, NOW).status, LoanStatus::Overdue);
    }

    #[test]
    fn test_deadline_equal_to_now_is_not_overdue() {
        let loan = Loan::Repayment(repayment(1050, 0, NOW, true));
        assert_eq!(project(&loan, NOW).status, LoanStatus::Active);
    }

    #[test]
    fn test_unapproved_loan_is_pending_even_past_deadline() {
        let loan = Loan::Repayment(repayment(1050, 0, NOW - DAY, false));
        assert_eq!(project(&loan, NOW).status, LoanStatus::Pending);
    }

    #[test]
    fn test_zero_total_has_zero_progress() {
        let loan = Loan::Repayment(repayment(0, 0, NOW + DAY, true));
        let view = project(&loan, NOW);
        assert_eq!(view.progress_percent, 0);
        assert_eq!(view.remaining_amount, U256::ZERO);
    }

    #[test]
    fn test_progress_is_floored() {
        assert_eq!(progress_percent(U256::from(1u64), U256::from(3u64)), 33);
        assert_eq!(progress_percent(U256::from(2u64), U256::from(3u64)), 66);
        assert_eq!(progress_percent(U256::from(5u64), U256::from(3u64)), 100);
    }

    #[test]
    fn test_status_never_regresses_as_time_passes() {
        let loans = [
            Loan::Repayment(repayment(1050, 0, NOW, true)),
            Loan::Repayment(repayment(1050, 500, NOW, true)),
            Loan::Repayment(repayment(1050, 0, NOW, false)),
            Loan::Funding(funding(900, 300, NOW, true)),
            Loan::Funding(funding(900, 300, NOW, false)),
            Loan::Funding(funding(900, 900, NOW, true)),
        ];

        for loan in &loans {
            let mut last = status(loan, NOW - 10 * DAY).rank();
            for t in (NOW - 10 * DAY..NOW + 10 * DAY).step_by(DAY as usize / 2) {
                let rank = status(loan, t).rank();
                assert!(rank >= last, "status regressed for {:?} at {}", loan, t);
                last = rank;
            }
        }
    }

    #[test]
    fn test_status_never_regresses_across_repayment_lifecycle() {
        let deadline = NOW + DAY;
        let stages = [
            repayment(1050, 0, deadline, false),
            repayment(1050, 0, deadline, true),
            repayment(1050, 500, deadline, true),
            repayment(1050, 1050, deadline, true),
        ];

        let ranks: Vec<u8> = stages
            .iter()
            .map(|l| repayment_status(l, NOW).rank())
            .collect();
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_funding_status_transitions() {
        assert_eq!(
            funding_status(&funding(900, 300, NOW + DAY, false), NOW),
            LoanStatus::Pending
        );
        assert_eq!(
            funding_status(&funding(900, 300, NOW + DAY, true), NOW),
            LoanStatus::Active
        );
        assert_eq!(
            funding_status(&funding(900, 300, NOW - DAY, true), NOW),
            LoanStatus::Expired
        );
        assert_eq!(
            funding_status(&funding(900, 900, NOW - DAY, true), NOW),
            LoanStatus::Funded
        );
    }

    #[test]
    fn test_funding_view_reports_shortfall() {
        let view = project(&Loan::Funding(funding(900, 300, NOW + DAY, true)), NOW);
        assert_eq!(view.remaining_amount, U256::from(600u64));
        assert_eq!(view.progress_percent, 33);
        match view.detail {
            LoanDetail::Funding { is_funded, .. } => assert!(!is_funded),
            other => panic!("unexpected detail: {:?}", other),
        }
    }

    #[test]
    fn test_view_json_shape() {
        let view = project(&Loan::Repayment(repayment(1050, 0, NOW + DAY, true)), NOW);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "active");
        assert_eq!(json["remainingAmount"], "1050");
        assert_eq!(json["detail"]["kind"], "repayment");
        assert_eq!(json["detail"]["totalRepaymentAmount"], "1050");
    }
}
