// ✅ Data Quality Engine - Validate raw sanctions records before merging
// A critical issue makes a record unusable (skipped, never fatal);
// warnings and info are carried into the aggregation report.

use crate::error::TraceError;
use crate::models::{validate_address, Chain};
use crate::normalizer::RawRecord;
use serde::{Deserialize, Serialize};

// ============================================================================
// SEVERITY & ISSUES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Record cannot be used
    Warning,  // Part of the record is dropped or questionable
    Info,     // Usable, but a field the merge relies on is missing
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub severity: Severity,
    pub field: String,
    pub issue: String,
}

impl QualityIssue {
    fn new(severity: Severity, field: &str, issue: String) -> Self {
        QualityIssue {
            severity,
            field: field.to_string(),
            issue,
        }
    }
}

// ============================================================================
// QUALITY REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// RawRecord::label of the validated record
    pub record: String,
    pub issues: Vec<QualityIssue>,
}

impl QualityReport {
    pub fn is_usable(&self) -> bool {
        !self.has_critical_issues()
    }

    pub fn has_critical_issues(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Critical)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &QualityIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    /// First critical issue as a data-quality fault
    pub fn fault(&self) -> Option<TraceError> {
        self.issues
            .iter()
            .find(|i| i.severity == Severity::Critical)
            .map(|i| TraceError::DataQuality {
                record: self.record.clone(),
                reason: i.issue.clone(),
            })
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} issues ({} critical)",
            self.record,
            self.issues.len(),
            self.issues
                .iter()
                .filter(|i| i.severity == Severity::Critical)
                .count()
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_records: usize,
    pub skipped_records: usize,
    pub records_with_warnings: usize,
}

// ============================================================================
// DATA QUALITY ENGINE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct DataQualityEngine;

impl DataQualityEngine {
    pub fn new() -> Self {
        DataQualityEngine
    }

    pub fn validate(&self, record: &RawRecord) -> QualityReport {
        let mut issues = Vec::new();

        let has_name = record.name.as_deref().map_or(false, |n| !n.trim().is_empty());
        let valid_addresses = record
            .addresses
            .iter()
            .filter(|a| validate_address(&a.address).is_ok())
            .count();

        // Rule 1: something to merge on
        if !has_name && valid_addresses == 0 {
            issues.push(QualityIssue::new(
                Severity::Critical,
                "identity",
                "record has neither a name nor a usable address".to_string(),
            ));
        }

        // Rule 2: malformed addresses are dropped
        for address in &record.addresses {
            if let Err(reason) = validate_address(&address.address) {
                issues.push(QualityIssue::new(
                    Severity::Warning,
                    "addresses",
                    format!("dropping address {:?}: {}", address.address, reason),
                ));
            }
        }

        // Rule 3: chain could not be determined
        for address in record.addresses.iter().filter(|a| a.chain == Chain::Unknown) {
            issues.push(QualityIssue::new(
                Severity::Info,
                "addresses",
                format!("unknown chain for address {}", address.address),
            ));
        }

        // Rule 4: undated records lose status conflicts to dated ones
        if record.designation_date.is_none() {
            issues.push(QualityIssue::new(
                Severity::Info,
                "designation_date",
                "no designation date".to_string(),
            ));
        }

        // Rule 5: status assumed designated
        if record.status.is_none() {
            issues.push(QualityIssue::new(
                Severity::Info,
                "status",
                "no status, assuming designated".to_string(),
            ));
        }

        // Rule 6: volume estimate must be a real, non-negative amount
        if let Some(volume) = record.volume_estimate_usd {
            if !volume.is_finite() || volume < 0.0 {
                issues.push(QualityIssue::new(
                    Severity::Warning,
                    "volume_estimate_usd",
                    format!("ignoring invalid volume estimate {}", volume),
                ));
            }
        }

        QualityReport {
            record: record.label(),
            issues,
        }
    }

    pub fn validate_batch(&self, records: &[RawRecord]) -> Vec<QualityReport> {
        records.iter().map(|r| self.validate(r)).collect()
    }

    pub fn batch_summary(&self, reports: &[QualityReport]) -> BatchSummary {
        BatchSummary {
            total_records: reports.len(),
            skipped_records: reports.iter().filter(|r| !r.is_usable()).count(),
            records_with_warnings: reports.iter().filter(|r| r.warnings().next().is_some()).count(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DesignationStatus, SanctionsSource};
    use chrono::NaiveDate;

    fn complete_record() -> RawRecord {
        RawRecord::new(SanctionsSource::Ofac)
            .with_name("Garantex")
            .with_address(Chain::Ethereum, "0x6f1ca141a28907f78ebaa64fb83a9088b02a8352")
            .with_date(NaiveDate::from_ymd_opt(2022, 4, 5).unwrap())
            .with_status(DesignationStatus::Designated)
    }

    #[test]
    fn test_complete_record_has_no_issues() {
        let report = DataQualityEngine::new().validate(&complete_record());
        assert!(report.issues.is_empty());
        assert!(report.is_usable());
        assert!(report.fault().is_none());
    }

    #[test]
    fn test_missing_name_and_address_is_critical() {
        let record = RawRecord::new(SanctionsSource::Eu).with_source_id("EU.1");
        let report = DataQualityEngine::new().validate(&record);

        assert!(!report.is_usable());
        match report.fault() {
            Some(TraceError::DataQuality { record, .. }) => assert!(record.contains("eu:EU.1")),
            other => panic!("expected data quality fault, got {:?}", other),
        }
    }

    #[test]
    fn test_address_only_record_is_usable() {
        let record = RawRecord::new(SanctionsSource::Uk).with_address(Chain::Tron, "TXyz123");
        let report = DataQualityEngine::new().validate(&record);
        assert!(report.is_usable());
    }

    #[test]
    fn test_malformed_address_is_warning() {
        let record = complete_record().with_address(Chain::Bitcoin, "not an address!");
        let report = DataQualityEngine::new().validate(&record);

        assert!(report.is_usable());
        assert_eq!(report.warnings().count(), 1);
    }

    #[test]
    fn test_batch_summary() {
        let engine = DataQualityEngine::new();
        let records = vec![
            complete_record(),
            RawRecord::new(SanctionsSource::Eu),
            complete_record().with_address(Chain::Bitcoin, "bad address"),
        ];

        let summary = engine.batch_summary(&engine.validate_batch(&records));
        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.skipped_records, 1);
        assert_eq!(summary.records_with_warnings, 1);
    }
}
