use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::PipelineError;
use crate::logic::loaders::Row;
use crate::logic::rules::{RuleContext, RuleRegistry};
use crate::model::{FieldValidation, Id, ImportSchema, StagingRecord};
use crate::store::traits::Store;

/// Columns every upload must carry regardless of schema. `id` is injected
/// from the staging record itself before validation, mirroring how rows are
/// rebuilt from the staging store.
pub const ESSENTIAL_HEADERS: [&str; 4] = ["first_name", "last_name", "dob", "id"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub valid: usize,
    pub invalid: usize,
    pub percentage_of_invalid_items: f64,
}

/// `invalid / (invalid + valid) * 100`, rounded to 2 decimal places; 0 when
/// there are no rows at all.
pub fn percentage_of_invalid_items(invalid: usize, valid: usize) -> f64 {
    let total = invalid + valid;
    if total == 0 {
        return 0.0;
    }
    let raw = invalid as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

/// The staged row as the validator sees it: verbatim fields plus the staging
/// record's own id under `id`.
fn working_row(record: &StagingRecord) -> Row {
    let mut row = record.fields.clone();
    row.insert("id".to_string(), serde_json::Value::String(record.id.clone()));
    row
}

pub struct UploadValidator;

impl UploadValidator {
    /// Header validation runs once per upload, before any row-level rule.
    /// Columns must be a subset of (schema properties ∪ essential headers)
    /// and must include every essential header. A violation aborts the whole
    /// upload: row validation depends on the required fields existing.
    pub fn validate_headers(
        records: &[StagingRecord],
        schema: &ImportSchema,
    ) -> Result<(), Vec<String>> {
        let columns: BTreeSet<String> = records
            .iter()
            .flat_map(|r| working_row(r).into_keys())
            .collect();
        let schema_properties: BTreeSet<&String> = schema.property_names().collect();

        let mut errors = Vec::new();

        let invalid: Vec<String> = columns
            .iter()
            .filter(|c| {
                !schema_properties.contains(c)
                    && !ESSENTIAL_HEADERS.contains(&c.as_str())
            })
            .cloned()
            .collect();
        if !invalid.is_empty() {
            errors.push(PipelineError::InvalidColumns(invalid).to_string());
        }

        for header in ESSENTIAL_HEADERS {
            if !columns.contains(header) {
                errors.push(PipelineError::MissingEssentialHeader(header.to_string()).to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Run every declared rule over every staged row of the upload and
    /// persist the outcomes back onto the records in one write.
    pub async fn validate_upload<S: Store>(
        store: &S,
        registry: &RuleRegistry,
        schema: &ImportSchema,
        upload_id: &Id,
        user_id: &Id,
    ) -> Result<ValidationSummary> {
        let records = store.list_staging_for_upload(upload_id).await?;
        let records: Vec<_> = records.into_iter().filter(|r| !r.is_deleted).collect();

        // Uniqueness rules see the entire staging store, not just this
        // upload.
        let all_rows: Vec<Row> = store
            .list_all_staging()
            .await?
            .iter()
            .filter(|r| !r.is_deleted)
            .map(working_row)
            .collect();

        let mut valid = 0usize;
        let mut invalid = 0usize;
        let mut updated = Vec::with_capacity(records.len());

        for mut record in records {
            let row = working_row(&record);
            record.validations.clear();

            for (field, descriptor) in &schema.properties {
                let Some(value) = row.get(field) else {
                    continue;
                };
                let context = RuleContext {
                    field_name: field,
                    row: &row,
                    all_rows: &all_rows,
                };

                if let Some(rule) = &descriptor.validation_calculation {
                    let outcome = registry.invoke(rule, value, &context);
                    record.validations.insert(
                        field.clone(),
                        FieldValidation {
                            success: outcome.success,
                            field_name: field.clone(),
                            note: outcome.note,
                        },
                    );
                }

                if let Some(rule) = &descriptor.uniqueness {
                    let outcome = registry.invoke(rule, value, &context);
                    record.validations.insert(
                        format!("{}_uniqueness", field),
                        FieldValidation {
                            success: outcome.success,
                            field_name: field.clone(),
                            note: outcome.note,
                        },
                    );
                }
            }

            if record.has_validation_failures() {
                invalid += 1;
            } else {
                valid += 1;
            }
            record.audit.touch(user_id);
            updated.push(record);
        }

        store.update_staging_batch(updated).await?;

        Ok(ValidationSummary {
            valid,
            invalid,
            percentage_of_invalid_items: percentage_of_invalid_items(invalid, valid),
        })
    }
}
