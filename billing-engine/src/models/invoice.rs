//! Invoice value objects.
//!
//! Invoices are constructed by the injected [`crate::collab::InvoiceBuilder`];
//! the engine only reads status, total and dates to drive scheduling,
//! collection and e-mail decisions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::Paid => "paid",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "draft" => InvoiceStatus::Draft,
            "paid" => InvoiceStatus::Paid,
            _ => InvoiceStatus::Issued,
        }
    }
}

/// Line item on an invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub amount: Decimal,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub prorated: bool,
}

/// Invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub customer_id: Uuid,
    pub status: String,
    pub currency: String,
    pub total: Decimal,
    pub issue_date: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
    pub line_items: Vec<LineItem>,
    pub created_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn invoice_status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }

    pub fn mark_paid(&mut self) {
        self.status = InvoiceStatus::Paid.as_str().to_string();
    }
}
