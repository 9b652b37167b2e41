//! PostgreSQL mirror

use std::str::FromStr;

use alloy_primitives::{Address, U256};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{LoanFilter, LoanMirror, MirrorError, MirroredLoan, UpsertOutcome};
use crate::db;
use crate::loan::{LoanDonation, LoanEvent, LoanEventType, LoanKind, LoanStatus};

/// Lowercase `0x` hex, the stored form of every address
pub fn address_key(address: &Address) -> String {
    format!("{:#x}", address)
}

fn parse_address(value: &str) -> Result<Address, MirrorError> {
    Address::from_str(value).map_err(|e| MirrorError::InvalidData(format!("address {}: {}", value, e)))
}

pub fn to_numeric(value: U256) -> Result<BigDecimal, MirrorError> {
    BigDecimal::from_str(&value.to_string()).map_err(|e| MirrorError::InvalidData(e.to_string()))
}

pub fn from_numeric(value: &BigDecimal) -> Result<U256, MirrorError> {
    let (digits, _) = value.with_scale(0).as_bigint_and_exponent();
    U256::from_str(&digits.to_string())
        .map_err(|e| MirrorError::InvalidData(format!("amount {}: {}", value, e)))
}

fn to_i64(value: u64, field: &str) -> Result<i64, MirrorError> {
    i64::try_from(value).map_err(|_| MirrorError::InvalidData(format!("{} out of range: {}", field, value)))
}

#[derive(Debug, sqlx::FromRow)]
struct LoanRow {
    id: Uuid,
    contract_address: String,
    kind: LoanKind,
    chain_loan_id: i64,
    borrower_id: Uuid,
    borrower_address: String,
    title: Option<String>,
    description: Option<String>,
    document_link: Option<String>,
    amount: BigDecimal,
    interest_rate: Option<i64>,
    total_repayment_amount: Option<BigDecimal>,
    deadline: i64,
    amount_collected: BigDecimal,
    amount_repaid: BigDecimal,
    approved: bool,
    status: LoanStatus,
    synced_at: DateTime<Utc>,
}

impl TryFrom<LoanRow> for MirroredLoan {
    type Error = MirrorError;

    fn try_from(row: LoanRow) -> Result<Self, Self::Error> {
        Ok(MirroredLoan {
            id: row.id,
            contract: parse_address(&row.contract_address)?,
            kind: row.kind,
            chain_loan_id: row.chain_loan_id.max(0) as u64,
            borrower_id: row.borrower_id,
            borrower: parse_address(&row.borrower_address)?,
            title: row.title,
            description: row.description,
            document_link: row.document_link,
            amount: from_numeric(&row.amount)?,
            interest_rate: row.interest_rate.map(|r| r.max(0) as u64),
            total_repayment_amount: row
                .total_repayment_amount
                .as_ref()
                .map(from_numeric)
                .transpose()?,
            deadline: row.deadline.max(0) as u64,
            amount_collected: from_numeric(&row.amount_collected)?,
            amount_repaid: from_numeric(&row.amount_repaid)?,
            approved: row.approved,
            status: row.status,
            synced_at: row.synced_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DonationRow {
    contract_address: String,
    chain_loan_id: i64,
    lender_address: String,
    amount: BigDecimal,
    transaction_hash: String,
    log_index: i64,
    block_number: Option<i64>,
}

impl TryFrom<DonationRow> for LoanDonation {
    type Error = MirrorError;

    fn try_from(row: DonationRow) -> Result<Self, Self::Error> {
        Ok(LoanDonation {
            contract: parse_address(&row.contract_address)?,
            loan_id: row.chain_loan_id.max(0) as u64,
            lender: parse_address(&row.lender_address)?,
            amount: from_numeric(&row.amount)?,
            transaction_hash: row.transaction_hash,
            log_index: row.log_index.max(0) as u64,
            block_number: row.block_number.map(|b| b.max(0) as u64),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    event_type: LoanEventType,
    contract_address: String,
    chain_loan_id: i64,
    transaction_hash: String,
    block_number: Option<i64>,
    data: serde_json::Value,
}

impl TryFrom<EventRow> for LoanEvent {
    type Error = MirrorError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(LoanEvent {
            event_type: row.event_type,
            contract: parse_address(&row.contract_address)?,
            loan_id: row.chain_loan_id.max(0) as u64,
            transaction_hash: row.transaction_hash,
            block_number: row.block_number.map(|b| b.max(0) as u64),
            data: row.data,
        })
    }
}

const LOAN_COLUMNS: &str = "id, contract_address, kind, chain_loan_id, borrower_id, \
    borrower_address, title, description, document_link, amount, interest_rate, \
    total_repayment_amount, deadline, amount_collected, amount_repaid, approved, status, synced_at";

/// Mirror backed by the `loans`, `loan_events`, `loan_donations`, `users`,
/// `indexer_state` and `system_settings` tables
#[derive(Clone)]
pub struct PgLoanMirror {
    db_pool: PgPool,
}

impl PgLoanMirror {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db_pool
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &LoanFilter) {
        if let Some(contract) = filter.contract {
            builder.push(" AND contract_address = ");
            builder.push_bind(address_key(&contract));
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ");
            builder.push_bind(status);
        }
        if let Some(borrower) = filter.borrower {
            builder.push(" AND borrower_address = ");
            builder.push_bind(address_key(&borrower));
        }
    }
}

impl LoanMirror for PgLoanMirror {
    async fn ping(&self) -> Result<(), MirrorError> {
        db::check_health(&self.db_pool)
            .await
            .map_err(|e| MirrorError::Unavailable(e.to_string()))
    }

    async fn find_or_create_user_by_address(&self, address: Address) -> Result<Uuid, MirrorError> {
        let key = address_key(&address);

        sqlx::query("INSERT INTO users (id, address) VALUES ($1, $2) ON CONFLICT (address) DO NOTHING")
            .bind(Uuid::new_v4())
            .bind(&key)
            .execute(&self.db_pool)
            .await?;

        let (id,): (Uuid,) = sqlx::query_as("SELECT id FROM users WHERE address = $1")
            .bind(&key)
            .fetch_one(&self.db_pool)
            .await?;

        Ok(id)
    }

    async fn find_loan_by_chain_id(
        &self,
        contract: Address,
        loan_id: u64,
    ) -> Result<Option<MirroredLoan>, MirrorError> {
        let row = sqlx::query_as::<_, LoanRow>(&format!(
            "SELECT {} FROM loans WHERE contract_address = $1 AND chain_loan_id = $2",
            LOAN_COLUMNS
        ))
        .bind(address_key(&contract))
        .bind(to_i64(loan_id, "loan id")?)
        .fetch_optional(&self.db_pool)
        .await?;

        row.map(MirroredLoan::try_from).transpose()
    }

    async fn upsert_loan(&self, loan: &MirroredLoan) -> Result<UpsertOutcome, MirrorError> {
        // xmax = 0 only for freshly inserted rows; no row back means nothing changed
        let inserted: Option<(bool,)> = sqlx::query_as(
            r#"
            INSERT INTO loans (
                id, contract_address, kind, chain_loan_id, borrower_id, borrower_address,
                title, description, document_link, amount, interest_rate,
                total_repayment_amount, deadline, amount_collected, amount_repaid,
                approved, status, synced_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (contract_address, chain_loan_id) DO UPDATE SET
                amount_collected = EXCLUDED.amount_collected,
                amount_repaid = EXCLUDED.amount_repaid,
                approved = EXCLUDED.approved,
                status = EXCLUDED.status,
                deadline = CASE WHEN loans.approved THEN loans.deadline ELSE EXCLUDED.deadline END,
                total_repayment_amount = CASE
                    WHEN loans.approved THEN loans.total_repayment_amount
                    ELSE EXCLUDED.total_repayment_amount
                END,
                synced_at = EXCLUDED.synced_at,
                updated_at = NOW()
            WHERE loans.amount_collected IS DISTINCT FROM EXCLUDED.amount_collected
               OR loans.amount_repaid IS DISTINCT FROM EXCLUDED.amount_repaid
               OR loans.approved IS DISTINCT FROM EXCLUDED.approved
               OR loans.status IS DISTINCT FROM EXCLUDED.status
               OR (NOT loans.approved AND (
                    loans.deadline IS DISTINCT FROM EXCLUDED.deadline
                    OR loans.total_repayment_amount IS DISTINCT FROM EXCLUDED.total_repayment_amount
               ))
            RETURNING (xmax = 0)
            "#,
        )
        .bind(loan.id)
        .bind(address_key(&loan.contract))
        .bind(loan.kind)
        .bind(to_i64(loan.chain_loan_id, "loan id")?)
        .bind(loan.borrower_id)
        .bind(address_key(&loan.borrower))
        .bind(&loan.title)
        .bind(&loan.description)
        .bind(&loan.document_link)
        .bind(to_numeric(loan.amount)?)
        .bind(loan.interest_rate.map(|r| to_i64(r, "interest rate")).transpose()?)
        .bind(loan.total_repayment_amount.map(to_numeric).transpose()?)
        .bind(to_i64(loan.deadline, "deadline")?)
        .bind(to_numeric(loan.amount_collected)?)
        .bind(to_numeric(loan.amount_repaid)?)
        .bind(loan.approved)
        .bind(loan.status)
        .bind(loan.synced_at)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(match inserted {
            Some((true,)) => UpsertOutcome::Inserted,
            Some((false,)) => UpsertOutcome::Updated,
            None => UpsertOutcome::Unchanged,
        })
    }

    async fn insert_event_if_absent(&self, event: &LoanEvent) -> Result<bool, MirrorError> {
        let result = sqlx::query(
            r#"
            INSERT INTO loan_events (
                id, event_type, contract_address, chain_loan_id, transaction_hash, block_number, data
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (transaction_hash, event_type) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.event_type)
        .bind(address_key(&event.contract))
        .bind(to_i64(event.loan_id, "loan id")?)
        .bind(&event.transaction_hash)
        .bind(event.block_number.map(|b| to_i64(b, "block")).transpose()?)
        .bind(&event.data)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_donation_if_absent(&self, donation: &LoanDonation) -> Result<bool, MirrorError> {
        let lender_id = self.find_or_create_user_by_address(donation.lender).await?;

        let result = sqlx::query(
            r#"
            INSERT INTO loan_donations (
                id, contract_address, chain_loan_id, lender_id, lender_address,
                amount, transaction_hash, log_index, block_number
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (transaction_hash, log_index) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(address_key(&donation.contract))
        .bind(to_i64(donation.loan_id, "loan id")?)
        .bind(lender_id)
        .bind(address_key(&donation.lender))
        .bind(to_numeric(donation.amount)?)
        .bind(&donation.transaction_hash)
        .bind(to_i64(donation.log_index, "log index")?)
        .bind(donation.block_number.map(|b| to_i64(b, "block")).transpose()?)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_loans(&self, filter: &LoanFilter) -> Result<(Vec<MirroredLoan>, i64), MirrorError> {
        let mut count_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM loans WHERE 1=1");
        Self::push_filters(&mut count_builder, filter);
        let (total,): (i64,) = count_builder
            .build_query_as()
            .fetch_one(&self.db_pool)
            .await?;

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM loans WHERE 1=1", LOAN_COLUMNS));
        Self::push_filters(&mut builder, filter);
        builder.push(" ORDER BY created_at DESC, chain_loan_id DESC LIMIT ");
        builder.push_bind(filter.limit);
        builder.push(" OFFSET ");
        builder.push_bind(filter.offset());

        let rows = builder
            .build_query_as::<LoanRow>()
            .fetch_all(&self.db_pool)
            .await?;

        let loans = rows
            .into_iter()
            .map(MirroredLoan::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((loans, total))
    }

    async fn donations_for_loan(
        &self,
        contract: Address,
        loan_id: u64,
    ) -> Result<Vec<LoanDonation>, MirrorError> {
        let rows = sqlx::query_as::<_, DonationRow>(
            r#"
            SELECT contract_address, chain_loan_id, lender_address, amount, transaction_hash,
                   log_index, block_number
            FROM loan_donations
            WHERE contract_address = $1 AND chain_loan_id = $2
            ORDER BY block_number NULLS LAST, log_index, created_at
            "#,
        )
        .bind(address_key(&contract))
        .bind(to_i64(loan_id, "loan id")?)
        .fetch_all(&self.db_pool)
        .await?;

        rows.into_iter().map(LoanDonation::try_from).collect()
    }

    async fn events_for_loan(
        &self,
        contract: Address,
        loan_id: u64,
    ) -> Result<Vec<LoanEvent>, MirrorError> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT event_type, contract_address, chain_loan_id, transaction_hash, block_number, data
            FROM loan_events
            WHERE contract_address = $1 AND chain_loan_id = $2
            ORDER BY block_number NULLS FIRST, created_at
            "#,
        )
        .bind(address_key(&contract))
        .bind(to_i64(loan_id, "loan id")?)
        .fetch_all(&self.db_pool)
        .await?;

        rows.into_iter().map(LoanEvent::try_from).collect()
    }

    async fn load_cursor(&self, contract: Address) -> Result<Option<u64>, MirrorError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT last_block FROM indexer_state WHERE contract_address = $1")
                .bind(address_key(&contract))
                .fetch_optional(&self.db_pool)
                .await?;

        Ok(row.map(|(block,)| block.max(0) as u64))
    }

    async fn save_cursor(&self, contract: Address, block: u64) -> Result<(), MirrorError> {
        sqlx::query(
            r#"
            INSERT INTO indexer_state (contract_address, last_block, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (contract_address) DO UPDATE
            SET last_block = EXCLUDED.last_block, updated_at = NOW()
            "#,
        )
        .bind(address_key(&contract))
        .bind(to_i64(block, "block")?)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    async fn load_contract_address(&self) -> Result<Option<Address>, MirrorError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT contract_address FROM system_settings WHERE id = 1")
                .fetch_optional(&self.db_pool)
                .await?;

        row.map(|(address,)| parse_address(&address)).transpose()
    }

    async fn save_contract_address(&self, address: Address) -> Result<(), MirrorError> {
        sqlx::query(
            r#"
            INSERT INTO system_settings (id, contract_address, updated_at)
            VALUES (1, $1, NOW())
            ON CONFLICT (id) DO UPDATE
            SET contract_address = EXCLUDED.contract_address, updated_at = NOW()
            "#,
        )
        .bind(address_key(&address))
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }
}
