//! Ledger persistence: wallets, the wallet transaction log, fee records,
//! open holds and referral payouts.
//!
//! A [`Posting`] is written in one database transaction so a crash never
//! leaves a wallet balance without the entry that explains it. Hold writes
//! are idempotent: placing an existing hold or clearing a missing one is a
//! no-op.

use chrono::{DateTime, Utc};
use linkex_core::Money;
use linkex_ledger::{
    EntryKind, EscrowHold, FeeRecord, FeeSource, HoldChange, LedgerEntry, LedgerParts, Posting,
    ReferralPayout, Wallet, WithdrawalHold,
};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::parse_name;

const HOLD_ESCROW: &str = "ESCROW";
const HOLD_WITHDRAWAL: &str = "WITHDRAWAL";

/// Write every record in `posting`.
pub async fn write_posting(pool: &PgPool, posting: &Posting) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    for wallet in &posting.wallets {
        upsert_wallet(&mut tx, wallet).await?;
    }
    for entry in &posting.entries {
        insert_entry(&mut tx, entry).await?;
    }
    if let Some(fee) = &posting.fee {
        insert_fee(&mut tx, fee).await?;
    }
    match &posting.hold {
        Some(HoldChange::EscrowPlaced(h)) => {
            insert_hold(&mut tx, h.order_id, HOLD_ESCROW, h.buyer_id, h.amount, h.created_at)
                .await?
        }
        Some(HoldChange::WithdrawalPlaced(h)) => {
            insert_hold(
                &mut tx,
                h.request_id,
                HOLD_WITHDRAWAL,
                h.user_id,
                h.amount,
                h.created_at,
            )
            .await?
        }
        Some(HoldChange::EscrowCleared(id)) | Some(HoldChange::WithdrawalCleared(id)) => {
            sqlx::query("DELETE FROM ledger_holds WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        None => {}
    }
    if let Some(payout) = &posting.referral {
        sqlx::query(
            "INSERT INTO referral_payouts (referred_id, referrer_id, order_id, amount_cents, paid_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(payout.referred_id)
        .bind(payout.referrer_id)
        .bind(payout.order_id)
        .bind(payout.amount.cents())
        .bind(payout.paid_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}

async fn upsert_wallet(
    tx: &mut Transaction<'_, Postgres>,
    wallet: &Wallet,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO wallets (user_id, balance_cents, pending_withdrawal_cents,
         total_deposited_cents, total_withdrawn_cents, total_earned_cents, total_spent_cents,
         updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (user_id) DO UPDATE SET
            balance_cents = EXCLUDED.balance_cents,
            pending_withdrawal_cents = EXCLUDED.pending_withdrawal_cents,
            total_deposited_cents = EXCLUDED.total_deposited_cents,
            total_withdrawn_cents = EXCLUDED.total_withdrawn_cents,
            total_earned_cents = EXCLUDED.total_earned_cents,
            total_spent_cents = EXCLUDED.total_spent_cents,
            updated_at = EXCLUDED.updated_at",
    )
    .bind(wallet.user_id)
    .bind(wallet.balance.cents())
    .bind(wallet.pending_withdrawal.cents())
    .bind(wallet.total_deposited.cents())
    .bind(wallet.total_withdrawn.cents())
    .bind(wallet.total_earned.cents())
    .bind(wallet.total_spent.cents())
    .bind(wallet.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_entry(
    tx: &mut Transaction<'_, Postgres>,
    entry: &LedgerEntry,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO ledger_entries (id, user_id, kind, amount_cents, balance_after_cents,
         reference_id, memo, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(entry.id)
    .bind(entry.user_id)
    .bind(entry.kind.as_str())
    .bind(entry.amount.cents())
    .bind(entry.balance_after.cents())
    .bind(entry.reference_id)
    .bind(&entry.memo)
    .bind(entry.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_fee(tx: &mut Transaction<'_, Postgres>, fee: &FeeRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO fee_records (id, source, reference_id, payer_id, gross_cents, fee_cents, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(fee.id)
    .bind(fee.source.as_str())
    .bind(fee.reference_id)
    .bind(fee.payer_id)
    .bind(fee.gross.cents())
    .bind(fee.fee.cents())
    .bind(fee.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_hold(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    kind: &str,
    user_id: Uuid,
    amount: Money,
    created_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO ledger_holds (id, kind, user_id, amount_cents, created_at)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(id)
    .bind(kind)
    .bind(user_id)
    .bind(amount.cents())
    .bind(created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Load the complete ledger for [`Ledger::restore`](linkex_ledger::Ledger::restore).
pub async fn load_parts(pool: &PgPool) -> Result<LedgerParts, sqlx::Error> {
    let wallets = sqlx::query_as::<_, WalletRow>(
        "SELECT user_id, balance_cents, pending_withdrawal_cents, total_deposited_cents,
         total_withdrawn_cents, total_earned_cents, total_spent_cents, updated_at
         FROM wallets",
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|r| Wallet {
        user_id: r.user_id,
        balance: Money::from_cents(r.balance_cents),
        pending_withdrawal: Money::from_cents(r.pending_withdrawal_cents),
        total_deposited: Money::from_cents(r.total_deposited_cents),
        total_withdrawn: Money::from_cents(r.total_withdrawn_cents),
        total_earned: Money::from_cents(r.total_earned_cents),
        total_spent: Money::from_cents(r.total_spent_cents),
        updated_at: r.updated_at,
    })
    .collect();

    let entries = sqlx::query_as::<_, EntryRow>(
        "SELECT id, user_id, kind, amount_cents, balance_after_cents, reference_id, memo, created_at
         FROM ledger_entries ORDER BY seq",
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|r| {
        Ok(LedgerEntry {
            kind: parse_name("ledger_entries.kind", &r.kind, EntryKind::from_name)?,
            id: r.id,
            user_id: r.user_id,
            amount: Money::from_cents(r.amount_cents),
            balance_after: Money::from_cents(r.balance_after_cents),
            reference_id: r.reference_id,
            memo: r.memo,
            created_at: r.created_at,
        })
    })
    .collect::<Result<Vec<_>, sqlx::Error>>()?;

    let fees = sqlx::query_as::<_, FeeRow>(
        "SELECT id, source, reference_id, payer_id, gross_cents, fee_cents, created_at
         FROM fee_records ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|r| {
        Ok(FeeRecord {
            source: parse_name("fee_records.source", &r.source, FeeSource::from_name)?,
            id: r.id,
            reference_id: r.reference_id,
            payer_id: r.payer_id,
            gross: Money::from_cents(r.gross_cents),
            fee: Money::from_cents(r.fee_cents),
            created_at: r.created_at,
        })
    })
    .collect::<Result<Vec<_>, sqlx::Error>>()?;

    let mut escrow = Vec::new();
    let mut withdrawals = Vec::new();
    let holds = sqlx::query_as::<_, HoldRow>(
        "SELECT id, kind, user_id, amount_cents, created_at FROM ledger_holds",
    )
    .fetch_all(pool)
    .await?;
    for h in holds {
        let amount = Money::from_cents(h.amount_cents);
        match h.kind.as_str() {
            HOLD_ESCROW => escrow.push(EscrowHold {
                order_id: h.id,
                buyer_id: h.user_id,
                amount,
                created_at: h.created_at,
            }),
            HOLD_WITHDRAWAL => withdrawals.push(WithdrawalHold {
                request_id: h.id,
                user_id: h.user_id,
                amount,
                created_at: h.created_at,
            }),
            other => return Err(super::unknown_value("ledger_holds.kind", other)),
        }
    }

    let referrals = sqlx::query_as::<_, ReferralRow>(
        "SELECT referred_id, referrer_id, order_id, amount_cents, paid_at
         FROM referral_payouts ORDER BY paid_at",
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|r| ReferralPayout {
        referrer_id: r.referrer_id,
        referred_id: r.referred_id,
        order_id: r.order_id,
        amount: Money::from_cents(r.amount_cents),
        paid_at: r.paid_at,
    })
    .collect();

    Ok(LedgerParts {
        wallets,
        entries,
        fees,
        escrow,
        withdrawals,
        referrals,
    })
}

#[derive(sqlx::FromRow)]
struct WalletRow {
    user_id: Uuid,
    balance_cents: i64,
    pending_withdrawal_cents: i64,
    total_deposited_cents: i64,
    total_withdrawn_cents: i64,
    total_earned_cents: i64,
    total_spent_cents: i64,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    amount_cents: i64,
    balance_after_cents: i64,
    reference_id: Option<Uuid>,
    memo: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct FeeRow {
    id: Uuid,
    source: String,
    reference_id: Uuid,
    payer_id: Uuid,
    gross_cents: i64,
    fee_cents: i64,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct HoldRow {
    id: Uuid,
    kind: String,
    user_id: Uuid,
    amount_cents: i64,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ReferralRow {
    referred_id: Uuid,
    referrer_id: Uuid,
    order_id: Uuid,
    amount_cents: i64,
    paid_at: DateTime<Utc>,
}
