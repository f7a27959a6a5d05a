//! Canonical event names and aggregate kinds emitted by the core

pub const JOURNAL_ENTRY_CREATED: &str = "journal.entry.created";
pub const JOURNAL_ENTRY_REVERSED: &str = "journal.entry.reversed";
pub const INVOICE_POSTED: &str = "invoice.posted";
pub const INVOICE_VOIDED: &str = "invoice.voided";
pub const INVOICE_ADJUSTED: &str = "invoice.adjusted";
pub const PAYMENT_RECORDED: &str = "payment.recorded";
pub const PAYMENT_REVERSED: &str = "payment.reversed";
pub const CREDIT_NOTE_POSTED: &str = "credit_note.posted";
pub const CREDIT_NOTE_REFUNDED: &str = "credit_note.refunded";
pub const BILL_POSTED: &str = "bill.posted";
pub const BILL_PAYMENT_RECORDED: &str = "bill.payment.recorded";
pub const INVENTORY_RECALC_REQUESTED: &str = "inventory.recalc.requested";
pub const OPENING_BALANCE_POSTED: &str = "opening_balance.posted";

pub const AGG_JOURNAL_ENTRY: &str = "JournalEntry";
pub const AGG_INVOICE: &str = "Invoice";
pub const AGG_CREDIT_NOTE: &str = "CreditNote";
pub const AGG_EXPENSE: &str = "Expense";
pub const AGG_PURCHASE_BILL: &str = "PurchaseBill";
pub const AGG_PAYMENT: &str = "Payment";
pub const AGG_STOCK_ITEM: &str = "StockItem";
pub const AGG_CUSTOMER: &str = "Customer";
pub const AGG_VENDOR: &str = "Vendor";
