//! Typed RIF records.
//!
//! One struct per [`RifFileType`]; [`RifRecord`] is the closed set the
//! extractor produces and the loader persists.

use crate::model::RifFileType;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A parsed record from any RIF file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RifRecord {
    Beneficiary(Beneficiary),
    Carrier(CarrierClaim),
    Inpatient(InpatientClaim),
    Outpatient(OutpatientClaim),
    Pde(PartDEvent),
}

impl RifRecord {
    /// The file type this record was read from
    pub fn file_type(&self) -> RifFileType {
        match self {
            RifRecord::Beneficiary(_) => RifFileType::Beneficiary,
            RifRecord::Carrier(_) => RifFileType::Carrier,
            RifRecord::Inpatient(_) => RifFileType::Inpatient,
            RifRecord::Outpatient(_) => RifFileType::Outpatient,
            RifRecord::Pde(_) => RifFileType::Pde,
        }
    }

    /// Business key used to decide between insert and update
    pub fn identity_key(&self) -> &str {
        match self {
            RifRecord::Beneficiary(r) => &r.beneficiary_id,
            RifRecord::Carrier(r) => &r.claim_id,
            RifRecord::Inpatient(r) => &r.claim_id,
            RifRecord::Outpatient(r) => &r.claim_id,
            RifRecord::Pde(r) => &r.event_id,
        }
    }

    /// Beneficiary the record belongs to
    pub fn beneficiary_id(&self) -> &str {
        match self {
            RifRecord::Beneficiary(r) => &r.beneficiary_id,
            RifRecord::Carrier(r) => &r.beneficiary_id,
            RifRecord::Inpatient(r) => &r.beneficiary_id,
            RifRecord::Outpatient(r) => &r.beneficiary_id,
            RifRecord::Pde(r) => &r.beneficiary_id,
        }
    }
}

/// Medicare beneficiary (`BENE_ID` identity)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beneficiary {
    pub beneficiary_id: String,
    pub state_code: String,
    pub county_code: String,
    pub postal_code: String,
    pub birth_date: NaiveDate,
    pub sex: String,
    pub race: String,
    pub surname: String,
    pub given_name: String,
    pub middle_name: Option<String>,
}

/// Carrier (Part B physician) claim, one line per row in the source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierClaim {
    pub claim_id: String,
    pub beneficiary_id: String,
    pub date_from: NaiveDate,
    pub date_through: NaiveDate,
    pub payment_amount: BigDecimal,
    pub principal_diagnosis_code: String,
    pub lines: Vec<CarrierClaimLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierClaimLine {
    pub number: u32,
    pub hcpcs_code: Option<String>,
    pub payment_amount: BigDecimal,
}

/// Inpatient institutional claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InpatientClaim {
    pub claim_id: String,
    pub beneficiary_id: String,
    pub date_from: NaiveDate,
    pub date_through: NaiveDate,
    pub provider_number: String,
    pub payment_amount: BigDecimal,
    pub admission_date: NaiveDate,
    pub discharge_date: Option<NaiveDate>,
    pub principal_diagnosis_code: String,
    pub lines: Vec<InpatientClaimLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InpatientClaimLine {
    pub number: u32,
    pub revenue_center: String,
    pub total_charge_amount: BigDecimal,
}

/// Outpatient institutional claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutpatientClaim {
    pub claim_id: String,
    pub beneficiary_id: String,
    pub date_from: NaiveDate,
    pub date_through: NaiveDate,
    pub provider_number: String,
    pub payment_amount: BigDecimal,
    pub principal_diagnosis_code: Option<String>,
    pub lines: Vec<OutpatientClaimLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutpatientClaimLine {
    pub number: u32,
    pub revenue_center: String,
    pub payment_amount: BigDecimal,
}

/// Part D prescription drug event (`PDE_ID` identity)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartDEvent {
    pub event_id: String,
    pub beneficiary_id: String,
    pub service_date: NaiveDate,
    pub product_service_id: String,
    pub quantity_dispensed: BigDecimal,
    pub days_supply: u32,
    pub total_cost: BigDecimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn pde() -> RifRecord {
        RifRecord::Pde(PartDEvent {
            event_id: "89".to_string(),
            beneficiary_id: "567834".to_string(),
            service_date: NaiveDate::from_ymd_opt(2015, 5, 12).unwrap(),
            product_service_id: "500904610".to_string(),
            quantity_dispensed: BigDecimal::from_str("60").unwrap(),
            days_supply: 30,
            total_cost: BigDecimal::from_str("362.84").unwrap(),
        })
    }

    #[test]
    fn test_identity_and_type() {
        let record = pde();
        assert_eq!(record.identity_key(), "89");
        assert_eq!(record.beneficiary_id(), "567834");
        assert_eq!(record.file_type(), RifFileType::Pde);
    }

    #[test]
    fn test_tagged_serialization() {
        let json = serde_json::to_value(pde()).unwrap();
        assert_eq!(json["type"], "PDE");
        assert_eq!(json["event_id"], "89");

        let back: RifRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, pde());
    }
}
