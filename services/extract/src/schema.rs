//! Column layouts of the RIF file types and the row-to-record mapping.
//!
//! Each [`RifFileType`] maps to a [`RecordSchema`]: the columns it requires,
//! the column that groups several rows into one record (claim files carry
//! one row per claim line), and the function assembling a record from its
//! rows. [`schema_for`] is the lookup the extractor dispatches through.

use crate::model::RifFileType;
use crate::records::{
    Beneficiary, CarrierClaim, CarrierClaimLine, InpatientClaim, InpatientClaimLine,
    OutpatientClaim, OutpatientClaimLine, PartDEvent, RifRecord,
};
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use csv_async::StringRecord;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

/// CCW date format, e.g. `17-MAR-1981`
const DATE_FORMAT: &str = "%d-%b-%Y";

/// A single field could not be read
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    #[error("Missing value for {column}")]
    Missing { column: &'static str },

    #[error("Invalid value for {column}: {value:?} ({reason})")]
    Invalid {
        column: &'static str,
        value: String,
        reason: String,
    },
}

/// Layout of one RIF file type
pub struct RecordSchema {
    pub file_type: RifFileType,
    pub columns: &'static [&'static str],
    /// Consecutive rows with equal values in this column form one record
    pub group_by: Option<&'static str>,
    assemble: fn(&[Row<'_>]) -> Result<RifRecord, FieldError>,
}

impl RecordSchema {
    /// Build a record from its rows; `rows` is never empty
    pub fn assemble(&self, rows: &[Row<'_>]) -> Result<RifRecord, FieldError> {
        (self.assemble)(rows)
    }

    /// Resolve this schema's columns against a file header
    pub fn index_columns(&self, header: &StringRecord) -> Result<ColumnIndex, Vec<&'static str>> {
        let positions: HashMap<String, usize> = header
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_ascii_uppercase(), i))
            .collect();

        let mut index = HashMap::with_capacity(self.columns.len());
        let mut missing = Vec::new();
        for column in self.columns {
            match positions.get(*column) {
                Some(position) => {
                    index.insert(*column, *position);
                }
                None => missing.push(*column),
            }
        }

        if missing.is_empty() {
            Ok(ColumnIndex(index))
        } else {
            Err(missing)
        }
    }
}

/// Schema column name to field position within a row
#[derive(Debug, Clone)]
pub struct ColumnIndex(HashMap<&'static str, usize>);

impl ColumnIndex {
    pub fn position(&self, column: &str) -> Option<usize> {
        self.0.get(column).copied()
    }
}

/// A data row viewed through its file's column index
pub struct Row<'a> {
    record: &'a StringRecord,
    columns: &'a ColumnIndex,
}

impl<'a> Row<'a> {
    pub fn new(record: &'a StringRecord, columns: &'a ColumnIndex) -> Self {
        Self { record, columns }
    }

    fn raw(&self, column: &'static str) -> &'a str {
        self.columns
            .0
            .get(column)
            .and_then(|i| self.record.get(*i))
            .map(str::trim)
            .unwrap_or("")
    }

    pub fn opt_text(&self, column: &'static str) -> Option<String> {
        let value = self.raw(column);
        (!value.is_empty()).then(|| value.to_string())
    }

    pub fn text(&self, column: &'static str) -> Result<String, FieldError> {
        self.opt_text(column).ok_or(FieldError::Missing { column })
    }

    pub fn parse<T>(&self, column: &'static str) -> Result<T, FieldError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let value = self.raw(column);
        if value.is_empty() {
            return Err(FieldError::Missing { column });
        }
        value.parse::<T>().map_err(|e| FieldError::Invalid {
            column,
            value: value.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn decimal(&self, column: &'static str) -> Result<BigDecimal, FieldError> {
        self.parse::<BigDecimal>(column)
    }

    pub fn date(&self, column: &'static str) -> Result<NaiveDate, FieldError> {
        let value = self.raw(column);
        if value.is_empty() {
            return Err(FieldError::Missing { column });
        }
        NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|e| FieldError::Invalid {
            column,
            value: value.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn opt_date(&self, column: &'static str) -> Result<Option<NaiveDate>, FieldError> {
        if self.raw(column).is_empty() {
            Ok(None)
        } else {
            self.date(column).map(Some)
        }
    }
}

/// Look up the schema for a file type
pub fn schema_for(file_type: RifFileType) -> &'static RecordSchema {
    match file_type {
        RifFileType::Beneficiary => &BENEFICIARY,
        RifFileType::Carrier => &CARRIER,
        RifFileType::Inpatient => &INPATIENT,
        RifFileType::Outpatient => &OUTPATIENT,
        RifFileType::Pde => &PDE,
    }
}

static BENEFICIARY: RecordSchema = RecordSchema {
    file_type: RifFileType::Beneficiary,
    columns: &[
        "BENE_ID",
        "STATE_CODE",
        "BENE_COUNTY_CD",
        "BENE_ZIP_CD",
        "BENE_BIRTH_DT",
        "BENE_SEX_IDENT_CD",
        "BENE_RACE_CD",
        "BENE_SRNM_NAME",
        "BENE_GVN_NAME",
        "BENE_MDL_NAME",
    ],
    group_by: None,
    assemble: assemble_beneficiary,
};

static CARRIER: RecordSchema = RecordSchema {
    file_type: RifFileType::Carrier,
    columns: &[
        "CLM_ID",
        "BENE_ID",
        "CLM_FROM_DT",
        "CLM_THRU_DT",
        "CARR_CLM_PMT_AMT",
        "PRNCPAL_DGNS_CD",
        "LINE_NUM",
        "HCPCS_CD",
        "LINE_NCH_PMT_AMT",
    ],
    group_by: Some("CLM_ID"),
    assemble: assemble_carrier,
};

static INPATIENT: RecordSchema = RecordSchema {
    file_type: RifFileType::Inpatient,
    columns: &[
        "CLM_ID",
        "BENE_ID",
        "CLM_FROM_DT",
        "CLM_THRU_DT",
        "PRVDR_NUM",
        "CLM_PMT_AMT",
        "CLM_ADMSN_DT",
        "NCH_BENE_DSCHRG_DT",
        "PRNCPAL_DGNS_CD",
        "CLM_LINE_NUM",
        "REV_CNTR",
        "REV_CNTR_TOT_CHRG_AMT",
    ],
    group_by: Some("CLM_ID"),
    assemble: assemble_inpatient,
};

static OUTPATIENT: RecordSchema = RecordSchema {
    file_type: RifFileType::Outpatient,
    columns: &[
        "CLM_ID",
        "BENE_ID",
        "CLM_FROM_DT",
        "CLM_THRU_DT",
        "PRVDR_NUM",
        "CLM_PMT_AMT",
        "PRNCPAL_DGNS_CD",
        "CLM_LINE_NUM",
        "REV_CNTR",
        "REV_CNTR_PMT_AMT_AMT",
    ],
    group_by: Some("CLM_ID"),
    assemble: assemble_outpatient,
};

static PDE: RecordSchema = RecordSchema {
    file_type: RifFileType::Pde,
    columns: &[
        "PDE_ID",
        "BENE_ID",
        "SRVC_DT",
        "PROD_SRVC_ID",
        "QTY_DSPNSD_NUM",
        "DAYS_SUPLY_NUM",
        "TOT_RX_CST_AMT",
    ],
    group_by: None,
    assemble: assemble_pde,
};

fn assemble_beneficiary(rows: &[Row<'_>]) -> Result<RifRecord, FieldError> {
    let row = &rows[0];
    Ok(RifRecord::Beneficiary(Beneficiary {
        beneficiary_id: row.text("BENE_ID")?,
        state_code: row.text("STATE_CODE")?,
        county_code: row.text("BENE_COUNTY_CD")?,
        postal_code: row.text("BENE_ZIP_CD")?,
        birth_date: row.date("BENE_BIRTH_DT")?,
        sex: row.text("BENE_SEX_IDENT_CD")?,
        race: row.text("BENE_RACE_CD")?,
        surname: row.text("BENE_SRNM_NAME")?,
        given_name: row.text("BENE_GVN_NAME")?,
        middle_name: row.opt_text("BENE_MDL_NAME"),
    }))
}

fn assemble_carrier(rows: &[Row<'_>]) -> Result<RifRecord, FieldError> {
    let first = &rows[0];
    let lines = rows
        .iter()
        .map(|row| {
            Ok(CarrierClaimLine {
                number: row.parse("LINE_NUM")?,
                hcpcs_code: row.opt_text("HCPCS_CD"),
                payment_amount: row.decimal("LINE_NCH_PMT_AMT")?,
            })
        })
        .collect::<Result<Vec<_>, FieldError>>()?;

    Ok(RifRecord::Carrier(CarrierClaim {
        claim_id: first.text("CLM_ID")?,
        beneficiary_id: first.text("BENE_ID")?,
        date_from: first.date("CLM_FROM_DT")?,
        date_through: first.date("CLM_THRU_DT")?,
        payment_amount: first.decimal("CARR_CLM_PMT_AMT")?,
        principal_diagnosis_code: first.text("PRNCPAL_DGNS_CD")?,
        lines,
    }))
}

fn assemble_inpatient(rows: &[Row<'_>]) -> Result<RifRecord, FieldError> {
    let first = &rows[0];
    let lines = rows
        .iter()
        .map(|row| {
            Ok(InpatientClaimLine {
                number: row.parse("CLM_LINE_NUM")?,
                revenue_center: row.text("REV_CNTR")?,
                total_charge_amount: row.decimal("REV_CNTR_TOT_CHRG_AMT")?,
            })
        })
        .collect::<Result<Vec<_>, FieldError>>()?;

    Ok(RifRecord::Inpatient(InpatientClaim {
        claim_id: first.text("CLM_ID")?,
        beneficiary_id: first.text("BENE_ID")?,
        date_from: first.date("CLM_FROM_DT")?,
        date_through: first.date("CLM_THRU_DT")?,
        provider_number: first.text("PRVDR_NUM")?,
        payment_amount: first.decimal("CLM_PMT_AMT")?,
        admission_date: first.date("CLM_ADMSN_DT")?,
        discharge_date: first.opt_date("NCH_BENE_DSCHRG_DT")?,
        principal_diagnosis_code: first.text("PRNCPAL_DGNS_CD")?,
        lines,
    }))
}

fn assemble_outpatient(rows: &[Row<'_>]) -> Result<RifRecord, FieldError> {
    let first = &rows[0];
    let lines = rows
        .iter()
        .map(|row| {
            Ok(OutpatientClaimLine {
                number: row.parse("CLM_LINE_NUM")?,
                revenue_center: row.text("REV_CNTR")?,
                payment_amount: row.decimal("REV_CNTR_PMT_AMT_AMT")?,
            })
        })
        .collect::<Result<Vec<_>, FieldError>>()?;

    Ok(RifRecord::Outpatient(OutpatientClaim {
        claim_id: first.text("CLM_ID")?,
        beneficiary_id: first.text("BENE_ID")?,
        date_from: first.date("CLM_FROM_DT")?,
        date_through: first.date("CLM_THRU_DT")?,
        provider_number: first.text("PRVDR_NUM")?,
        payment_amount: first.decimal("CLM_PMT_AMT")?,
        principal_diagnosis_code: first.opt_text("PRNCPAL_DGNS_CD"),
        lines,
    }))
}

fn assemble_pde(rows: &[Row<'_>]) -> Result<RifRecord, FieldError> {
    let row = &rows[0];
    Ok(RifRecord::Pde(PartDEvent {
        event_id: row.text("PDE_ID")?,
        beneficiary_id: row.text("BENE_ID")?,
        service_date: row.date("SRVC_DT")?,
        product_service_id: row.text("PROD_SRVC_ID")?,
        quantity_dispensed: row.decimal("QTY_DSPNSD_NUM")?,
        days_supply: row.parse("DAYS_SUPLY_NUM")?,
        total_cost: row.decimal("TOT_RX_CST_AMT")?,
    }))
}
