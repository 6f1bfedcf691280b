//! Resource allocator: least-loaded active proxy + valid active
//! account, picked and bumped inside the caller's transaction so claim stays
//! a single atomic step.

use reconmc_core::error::Result;
use reconmc_core::model::{Account, AccountId, Proxy, ProxyId};
use sqlx::{Postgres, Transaction};

use crate::rows::{AccountRow, ProxyRow};

pub struct Allocation {
    pub proxy: Proxy,
    pub account: Account,
}

/// Pick one active, under-cap proxy and one active, valid, under-cap
/// account, locking both rows `FOR UPDATE` and bumping their usage counters.
/// Returns `None` (not an error) if either pool is exhausted — the caller
/// interprets that as "no work claimable right now".
pub async fn allocate(tx: &mut Transaction<'_, Postgres>) -> Result<Option<Allocation>> {
    let proxy_row: Option<ProxyRow> = sqlx::query_as(
        r#"
        SELECT id, host, port, username, password, protocol,
               current_usage, max_concurrent, is_active, last_used_at
        FROM proxies
        WHERE is_active AND current_usage < max_concurrent
        ORDER BY current_usage ASC, last_used_at ASC NULLS FIRST
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .fetch_optional(&mut **tx)
    .await?;

    let Some(proxy_row) = proxy_row else {
        return Ok(None);
    };

    let account_row: Option<AccountRow> = sqlx::query_as(
        r#"
        SELECT id, type, username, access_token, refresh_token,
               current_usage, max_concurrent, is_active, is_valid,
               last_validated_at, last_validation_error
        FROM accounts
        WHERE is_active AND is_valid AND current_usage < max_concurrent
        ORDER BY current_usage ASC, last_validated_at ASC NULLS FIRST
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .fetch_optional(&mut **tx)
    .await?;

    let Some(account_row) = account_row else {
        return Ok(None);
    };

    sqlx::query("UPDATE proxies SET current_usage = current_usage + 1, last_used_at = now() WHERE id = $1")
        .bind(proxy_row.id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("UPDATE accounts SET current_usage = current_usage + 1, last_validated_at = now() WHERE id = $1")
        .bind(account_row.id)
        .execute(&mut **tx)
        .await?;

    let proxy = Proxy::try_from(proxy_row)?;
    let account = Account::try_from(account_row)?;
    Ok(Some(Allocation { proxy, account }))
}

/// Symmetric release, floored at zero so a double-release (e.g. a recovery
/// sweep racing a late `complete`) can never drive a counter negative.
pub async fn release(
    tx: &mut Transaction<'_, Postgres>,
    proxy_id: Option<ProxyId>,
    account_id: Option<AccountId>,
) -> Result<()> {
    if let Some(id) = proxy_id {
        sqlx::query("UPDATE proxies SET current_usage = GREATEST(current_usage - 1, 0) WHERE id = $1")
            .bind(id.0)
            .execute(&mut **tx)
            .await?;
    }
    if let Some(id) = account_id {
        sqlx::query("UPDATE accounts SET current_usage = GREATEST(current_usage - 1, 0) WHERE id = $1")
            .bind(id.0)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}
