//! Payment records.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle state of a payment. There is no deletion: corrections reverse
/// the payment and re-aggregate the ledger record it was applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Completed,
    Reversed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Reversed => "reversed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "completed" => Some(Self::Completed),
            "reversed" => Some(Self::Reversed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the money arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankDeposit,
    MobileMoney,
    Cheque,
    Card,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::BankDeposit => "bank_deposit",
            Self::MobileMoney => "mobile_money",
            Self::Cheque => "cheque",
            Self::Card => "card",
            Self::Other => "other",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "cash" => Some(Self::Cash),
            "bank_deposit" => Some(Self::BankDeposit),
            "mobile_money" => Some(Self::MobileMoney),
            "cheque" => Some(Self::Cheque),
            "card" => Some(Self::Card),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which intake path recorded the payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentSource {
    Manual,
    Webhook,
}

impl PaymentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Webhook => "webhook",
        }
    }
}

impl std::fmt::Display for PaymentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A recorded payment.
///
/// `ledger_record_id` is NULL for pre-registered payments: money received
/// and attributed to a student for a term whose billing does not exist yet.
/// The billing generator adopts those rows when it creates the record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    pub student_id: Uuid,
    pub ledger_record_id: Option<Uuid>,
    pub amount_paid: Decimal,
    pub method: String,
    pub transaction_reference: Option<String>,
    pub status: String,
    pub payment_date: NaiveDate,
    pub term: i16,
    pub academic_year: String,
    pub source: String,
    pub notes: Option<String>,
    pub recorded_utc: DateTime<Utc>,
}

impl Payment {
    pub fn parsed_status(&self) -> Option<PaymentStatus> {
        PaymentStatus::from_str(&self.status)
    }

    pub fn parsed_method(&self) -> Option<PaymentMethod> {
        PaymentMethod::from_str(&self.method)
    }

    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed.as_str()
    }
}
