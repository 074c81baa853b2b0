//! Registry read models: students and fee structures.
//!
//! These tables are maintained by the directory and admin services; the fee
//! engine only reads them to decide who gets billed and how much.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Student residency type, used for fee structure eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StudentType {
    DayScholar,
    Boarding,
}

impl StudentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DayScholar => "day_scholar",
            Self::Boarding => "boarding",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "day_scholar" => Some(Self::DayScholar),
            "boarding" => Some(Self::Boarding),
            _ => None,
        }
    }
}

impl std::fmt::Display for StudentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a fee is compulsory for every eligible student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FeeCategory {
    Mandatory,
    Optional,
}

impl FeeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mandatory => "mandatory",
            Self::Optional => "optional",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "mandatory" => Some(Self::Mandatory),
            "optional" => Some(Self::Optional),
            _ => None,
        }
    }
}

impl std::fmt::Display for FeeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A student as recorded in the registry.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Student {
    pub student_id: Uuid,
    pub admission_number: String,
    pub full_name: String,
    pub student_type: String,
    pub class_id: Uuid,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
}

impl Student {
    pub fn parsed_student_type(&self) -> Option<StudentType> {
        StudentType::from_str(&self.student_type)
    }
}

/// A billable fee definition for one term of one academic year.
///
/// `student_type` is an eligibility scope: `day_scholar`, `boarding`, or
/// `all`. The eligible class list lives in `fee_structure_classes`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FeeStructure {
    pub fee_structure_id: Uuid,
    pub name: String,
    pub term: i16,
    pub academic_year: String,
    pub category: String,
    pub student_type: String,
    pub amount: Decimal,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
}

impl FeeStructure {
    pub fn parsed_category(&self) -> Option<FeeCategory> {
        FeeCategory::from_str(&self.category)
    }

    /// Whether a student of the given type is eligible for this fee.
    pub fn applies_to(&self, student_type: StudentType) -> bool {
        self.student_type == "all" || self.student_type == student_type.as_str()
    }
}
