//! Canonical account lookup and lazy provisioning
//!
//! Posting flows resolve distinguished accounts by (tenant, code) and
//! create them on first need with their canonical name, normal balance,
//! and reporting tags. All helpers are idempotent.

use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::repos::account_repo::{self, Account, AccountType, NormalBalance};
use crate::repos::company_repo::Company;

pub const CODE_BANK: &str = "1000";
pub const CODE_ACCOUNTS_RECEIVABLE: &str = "1200";
pub const CODE_INVENTORY_ASSET: &str = "1400";
pub const CODE_ACCOUNTS_PAYABLE: &str = "2000";
pub const CODE_TAX_PAYABLE: &str = "2100";
pub const CODE_OPENING_BALANCE_EQUITY: &str = "3900";
pub const CODE_SALES_INCOME: &str = "4000";
pub const CODE_COGS: &str = "5000";

/// Find the account by (tenant, code) or create it with the given shape
pub async fn ensure_account(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    code: &str,
    name: &str,
    account_type: AccountType,
    normal_balance: NormalBalance,
    report_group: &str,
    cashflow_activity: &str,
) -> DomainResult<Account> {
    if let Some(existing) = account_repo::find_by_code_tx(tx, tenant_id, code).await? {
        return Ok(existing);
    }

    let account = account_repo::insert_tx(
        tx,
        tenant_id,
        code,
        name,
        account_type,
        normal_balance,
        Some(report_group),
        Some(cashflow_activity),
    )
    .await?;

    tracing::info!(
        tenant_id = %tenant_id,
        code = %code,
        account_id = %account.id,
        "provisioned canonical account"
    );

    Ok(account)
}

/// Default per-line revenue mapping (code 4000)
pub async fn sales_income_account(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
) -> DomainResult<Account> {
    ensure_account(
        tx,
        tenant_id,
        CODE_SALES_INCOME,
        "Sales Income",
        AccountType::Income,
        NormalBalance::Credit,
        "SALES",
        "OPERATING",
    )
    .await
}

/// Tax collected on sales, owed to the authority (code 2100)
pub async fn tax_payable_account(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
) -> DomainResult<Account> {
    ensure_account(
        tx,
        tenant_id,
        CODE_TAX_PAYABLE,
        "Tax Payable",
        AccountType::Liability,
        NormalBalance::Credit,
        "CURRENT_LIABILITY",
        "OPERATING",
    )
    .await
}

/// Resolve a configured distinguished account, checking tenancy, activity,
/// and the expected account type
async fn configured_account(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    account_id: Option<Uuid>,
    label: &str,
    expected_type: AccountType,
) -> DomainResult<Account> {
    let account_id = account_id
        .ok_or_else(|| DomainError::validation(format!("{label} account is not configured")))?;

    let account = account_repo::find_by_id_tx(tx, tenant_id, account_id)
        .await?
        .ok_or_else(|| DomainError::validation(format!("{label} account not found")))?;

    if !account.is_active {
        return Err(DomainError::validation(format!(
            "{label} account is inactive"
        )));
    }
    if account.account_type != expected_type {
        return Err(DomainError::validation(format!(
            "{label} account must be of type {expected_type:?}"
        )));
    }

    Ok(account)
}

pub async fn configured_ar_account(
    tx: &mut Transaction<'_, Postgres>,
    company: &Company,
) -> DomainResult<Account> {
    configured_account(
        tx,
        &company.id,
        company.ar_account_id,
        "accounts receivable",
        AccountType::Asset,
    )
    .await
}

pub async fn configured_ap_account(
    tx: &mut Transaction<'_, Postgres>,
    company: &Company,
) -> DomainResult<Account> {
    configured_account(
        tx,
        &company.id,
        company.ap_account_id,
        "accounts payable",
        AccountType::Liability,
    )
    .await
}

pub async fn configured_inventory_account(
    tx: &mut Transaction<'_, Postgres>,
    company: &Company,
) -> DomainResult<Account> {
    configured_account(
        tx,
        &company.id,
        company.inventory_asset_account_id,
        "inventory asset",
        AccountType::Asset,
    )
    .await
}

pub async fn configured_cogs_account(
    tx: &mut Transaction<'_, Postgres>,
    company: &Company,
) -> DomainResult<Account> {
    configured_account(
        tx,
        &company.id,
        company.cogs_account_id,
        "cost of goods sold",
        AccountType::Expense,
    )
    .await
}

pub async fn configured_opening_balance_account(
    tx: &mut Transaction<'_, Postgres>,
    company: &Company,
) -> DomainResult<Account> {
    configured_account(
        tx,
        &company.id,
        company.opening_balance_equity_account_id,
        "opening balance equity",
        AccountType::Equity,
    )
    .await
}

/// Accounts created for every new tenant, with the company wiring they map to
pub struct ProvisionedChart {
    pub bank: Account,
    pub accounts_receivable: Account,
    pub inventory_asset: Account,
    pub accounts_payable: Account,
    pub tax_payable: Account,
    pub opening_balance_equity: Account,
    pub sales_income: Account,
    pub cogs: Account,
}

/// Seed the canonical chart of accounts at tenant provisioning
pub async fn provision_chart(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
) -> DomainResult<ProvisionedChart> {
    let bank = ensure_account(
        tx,
        tenant_id,
        CODE_BANK,
        "Bank",
        AccountType::Asset,
        NormalBalance::Debit,
        "CASH_AND_BANK",
        "OPERATING",
    )
    .await?;

    let accounts_receivable = ensure_account(
        tx,
        tenant_id,
        CODE_ACCOUNTS_RECEIVABLE,
        "Accounts Receivable",
        AccountType::Asset,
        NormalBalance::Debit,
        "CURRENT_ASSET",
        "OPERATING",
    )
    .await?;

    let inventory_asset = ensure_account(
        tx,
        tenant_id,
        CODE_INVENTORY_ASSET,
        "Inventory Asset",
        AccountType::Asset,
        NormalBalance::Debit,
        "CURRENT_ASSET",
        "OPERATING",
    )
    .await?;

    let accounts_payable = ensure_account(
        tx,
        tenant_id,
        CODE_ACCOUNTS_PAYABLE,
        "Accounts Payable",
        AccountType::Liability,
        NormalBalance::Credit,
        "CURRENT_LIABILITY",
        "OPERATING",
    )
    .await?;

    let tax_payable = tax_payable_account(tx, tenant_id).await?;

    let opening_balance_equity = ensure_account(
        tx,
        tenant_id,
        CODE_OPENING_BALANCE_EQUITY,
        "Opening Balance Equity",
        AccountType::Equity,
        NormalBalance::Credit,
        "EQUITY",
        "FINANCING",
    )
    .await?;

    let sales_income = sales_income_account(tx, tenant_id).await?;

    let cogs = ensure_account(
        tx,
        tenant_id,
        CODE_COGS,
        "Cost of Goods Sold",
        AccountType::Expense,
        NormalBalance::Debit,
        "COST_OF_SALES",
        "OPERATING",
    )
    .await?;

    Ok(ProvisionedChart {
        bank,
        accounts_receivable,
        inventory_asset,
        accounts_payable,
        tax_payable,
        opening_balance_equity,
        sales_income,
        cogs,
    })
}
