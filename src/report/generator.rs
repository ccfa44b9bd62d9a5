//! Markdown report generation.
//!
//! This module generates Markdown integrity reports from aggregated
//! analysis results, plus the JSON equivalents.

use crate::analysis::aggregator::strongest_contributors;
use crate::models::{AggregatedResult, Flag, FlagSeverity, ReportMetadata, SubmissionReport};
use anyhow::Result;
use std::io::Write;
use std::path::Path;

const TOP_CONTRIBUTORS: usize = 3;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &SubmissionReport) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# Integrity Report\n\n");

    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_summary_section(&report.result));
    output.push_str(&generate_flags_section(&report.result.flags));
    output.push_str(&generate_breakdown_section(&report.result));
    output.push_str(&generate_evidence_section(&report.result));
    output.push_str(&generate_footer());

    output
}

/// Generate one Markdown document covering several submissions.
pub fn generate_batch_markdown_report(reports: &[SubmissionReport]) -> String {
    let mut output = String::new();

    output.push_str("# Integrity Batch Report\n\n");
    output.push_str(&format!("- **Submissions:** {}\n\n", reports.len()));

    output.push_str("| Submission | Source | Score | Risk | Flags |\n");
    output.push_str("|:---|:---|:---:|:---:|:---:|\n");
    for report in reports {
        let result = &report.result;
        output.push_str(&format!(
            "| `{}` | {} | {:.4} | {} {} | {} |\n",
            report.metadata.submission_id,
            report.metadata.source,
            result.integrity_score,
            result.risk_level.emoji(),
            result.risk_level,
            result.flags.len()
        ));
    }
    output.push('\n');

    for report in reports {
        output.push_str("---\n\n");
        output.push_str(&format!("## Submission `{}`\n\n", report.metadata.submission_id));
        output.push_str(&generate_summary_section(&report.result));
        output.push_str(&generate_flags_section(&report.result.flags));
        output.push_str(&generate_breakdown_section(&report.result));
    }

    output.push_str(&generate_footer());
    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Submission:** `{}`\n", metadata.submission_id));
    if let Some(ref user_id) = metadata.user_id {
        section.push_str(&format!("- **User:** `{}`\n", user_id));
    }
    if let Some(ref institution_id) = metadata.institution_id {
        section.push_str(&format!("- **Institution:** `{}`\n", institution_id));
    }
    section.push_str(&format!("- **Source:** {}\n", metadata.source));
    section.push_str(&format!(
        "- **Analysis Date:** {}\n",
        metadata.analysis_date.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Words:** {}\n", metadata.word_count));
    section.push_str(&format!(
        "- **Analysis Duration:** {:.2}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// Generate the score summary.
fn generate_summary_section(result: &AggregatedResult) -> String {
    let mut section = String::new();

    section.push_str("### Summary\n\n");
    section.push_str("| Integrity Score | Risk Level | Confidence |\n");
    section.push_str("|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| **{:.4}** | {} {} | {:.2} |\n\n",
        result.integrity_score,
        result.risk_level.emoji(),
        result.risk_level,
        result.confidence
    ));
    section.push_str(&format!("> {}\n\n", result.recommendation));

    let top = strongest_contributors(result, TOP_CONTRIBUTORS);
    if !top.is_empty() {
        section.push_str("**Strongest contributors:** ");
        let parts: Vec<String> = top
            .iter()
            .map(|(id, entry)| format!("`{}` ({:.4})", id, entry.weighted_contribution))
            .collect();
        section.push_str(&parts.join(", "));
        section.push_str("\n\n");
    }

    section
}

/// Generate the flags table.
fn generate_flags_section(flags: &[Flag]) -> String {
    let mut section = String::new();

    section.push_str("### Flags\n\n");

    if flags.is_empty() {
        section.push_str("No module crossed the flag threshold.\n\n");
        return section;
    }

    section.push_str("| Module | Score | Severity |\n");
    section.push_str("|:---|:---:|:---:|\n");
    for flag in flags {
        let badge = match flag.severity {
            FlagSeverity::High => "🔴 **HIGH**",
            FlagSeverity::Medium => "🟡 **MEDIUM**",
        };
        section.push_str(&format!(
            "| `{}` | {:.4} | {} |\n",
            flag.module, flag.score, badge
        ));
    }
    section.push('\n');

    section
}

/// Generate the per-module breakdown table.
fn generate_breakdown_section(result: &AggregatedResult) -> String {
    let mut section = String::new();

    section.push_str("### Module Breakdown\n\n");

    if result.is_empty() {
        section.push_str("No module produced a result.\n\n");
        return section;
    }

    section.push_str("| Module | Score | Weight | Contribution | Confidence | Time |\n");
    section.push_str("|:---|:---:|:---:|:---:|:---:|---:|\n");
    for (module_id, score) in &result.module_scores {
        match result.breakdown.get(module_id) {
            Some(entry) => section.push_str(&format!(
                "| `{}` | {:.4} | {:.2} | {:.4} | {:.2} | {} ms |\n",
                module_id,
                entry.score,
                entry.weight,
                entry.weighted_contribution,
                entry.confidence,
                entry.processing_ms
            )),
            None => section.push_str(&format!(
                "| `{}` | {:.4} | 0.00 | *not weighted* | - | - |\n",
                module_id, score
            )),
        }
    }
    section.push('\n');

    section
}

/// Generate collapsible raw evidence per weighted module.
fn generate_evidence_section(result: &AggregatedResult) -> String {
    if result.breakdown.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("### Evidence\n\n");
    for (module_id, entry) in &result.breakdown {
        let evidence = serde_json::to_string_pretty(&entry.evidence)
            .unwrap_or_else(|_| entry.evidence.to_string());
        section.push_str(&format!(
            "<details>\n<summary><code>{}</code></summary>\n\n```json\n{}\n```\n</details>\n\n",
            module_id, evidence
        ));
    }

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by integrity-engine v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &SubmissionReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Generate a JSON array covering several submissions.
pub fn generate_batch_json_report(reports: &[SubmissionReport]) -> Result<String> {
    serde_json::to_string_pretty(reports).map_err(Into::into)
}

/// Write rendered report content to a file.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
