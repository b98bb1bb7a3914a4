//! Aggregated build diagnostics
//!
//! Non-fatal problems encountered during a snapshot build are collected
//! here and rendered once at the end, instead of spamming per-paper
//! warnings. Fatal structural errors bypass this type entirely and abort
//! the build.

use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use crate::identity::IdentityDiagnostic;

/// How many sample rows each category shows in the rendered summary.
const SAMPLE_LIMIT: usize = 5;

#[derive(Debug, Default)]
pub struct BuildReport {
    pub identity_conflicts: Vec<String>,
    pub fingerprint_divergences: Vec<String>,
    pub skipped_records: Vec<String>,
    pub missing_assets: Vec<String>,
    pub inheritance_mismatches: Vec<String>,
    pub papers_written: usize,
    pub assets_exported: usize,
    pub assets_reused: usize,
}

impl BuildReport {
    pub fn record_identity(&mut self, diagnostics: &[IdentityDiagnostic]) {
        for diag in diagnostics {
            match diag {
                IdentityDiagnostic::Conflict {
                    chosen_id,
                    chosen_key,
                    losing,
                } => {
                    let losers: Vec<String> =
                        losing.iter().map(|(k, id)| format!("{k}→{id}")).collect();
                    self.identity_conflicts.push(format!(
                        "{chosen_key} kept {chosen_id}; also matched {}",
                        losers.join(", ")
                    ));
                }
                IdentityDiagnostic::FingerprintDivergence {
                    previous_id,
                    minted_key,
                    title_a,
                    title_b,
                } => {
                    self.fingerprint_divergences.push(format!(
                        "{minted_key} minted (was {previous_id}): {title_a:?} vs {title_b:?}"
                    ));
                }
            }
        }
    }

    pub fn skip_record(&mut self, reason: impl Into<String>) {
        self.skipped_records.push(reason.into());
    }

    pub fn missing_asset(&mut self, path: impl Into<String>) {
        self.missing_assets.push(path.into());
    }

    pub fn inheritance_mismatch(&mut self, detail: impl Into<String>) {
        self.inheritance_mismatches.push(detail.into());
    }

    pub fn has_problems(&self) -> bool {
        !self.identity_conflicts.is_empty()
            || !self.fingerprint_divergences.is_empty()
            || !self.skipped_records.is_empty()
            || !self.missing_assets.is_empty()
            || !self.inheritance_mismatches.is_empty()
    }

    /// Render the end-of-build summary table.
    pub fn render(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["category", "count", "samples"]);

        table.add_row(vec![
            Cell::new("papers written"),
            Cell::new(self.papers_written),
            Cell::new(""),
        ]);
        table.add_row(vec![
            Cell::new("assets exported / reused"),
            Cell::new(format!("{} / {}", self.assets_exported, self.assets_reused)),
            Cell::new(""),
        ]);
        for (name, items) in [
            ("identity conflicts", &self.identity_conflicts),
            ("fingerprint divergences", &self.fingerprint_divergences),
            ("skipped records", &self.skipped_records),
            ("missing assets", &self.missing_assets),
            ("inheritance mismatches", &self.inheritance_mismatches),
        ] {
            table.add_row(vec![
                Cell::new(name),
                Cell::new(items.len()),
                Cell::new(sample(items)),
            ]);
        }
        table.to_string()
    }
}

fn sample(items: &[String]) -> String {
    let shown: Vec<&str> = items.iter().take(SAMPLE_LIMIT).map(String::as_str).collect();
    let mut out = shown.join("\n");
    let extra = items.len().saturating_sub(SAMPLE_LIMIT);
    if extra > 0 {
        out.push_str(&format!("\n… and {extra} more"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counts_and_caps_samples() {
        let mut report = BuildReport::default();
        report.papers_written = 3;
        for i in 0..8 {
            report.skip_record(format!("record {i}"));
        }
        let rendered = report.render();
        assert!(rendered.contains("skipped records"));
        assert!(rendered.contains("record 0"));
        assert!(rendered.contains("… and 3 more"));
        assert!(report.has_problems());
    }
}
