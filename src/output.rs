//! Rendering of batch results for the command-line tool.

use serde::Serialize;

use crate::batch::{BatchRequest, BatchResult, Outcome, SkipReason};
use crate::db::RowSet;
use crate::error::{BatchError, Result};

/// Output format for the command-line tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable report.
    #[default]
    Text,
    /// The full result as JSON.
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(BatchError::config(format!(
                "Invalid output format: {s}. Expected: text or json"
            ))),
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    queries: Vec<&'a str>,
    #[serde(flatten)]
    result: &'a BatchResult,
}

/// Renders `result` for `request` in the given format.
pub fn render(request: &BatchRequest, result: &BatchResult, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(render_text(request, result)),
        OutputFormat::Json => {
            let report = JsonReport {
                queries: request.queries().iter().map(|q| q.text()).collect(),
                result,
            };
            serde_json::to_string_pretty(&report)
                .map_err(|e| BatchError::internal(format!("Failed to serialize result: {e}")))
        }
    }
}

fn render_text(request: &BatchRequest, result: &BatchResult) -> String {
    let mut out = String::new();

    for (index, (query, outcome)) in request.queries().iter().zip(&result.outcomes).enumerate() {
        let sql = one_line(query.text());
        match outcome {
            Outcome::Success(rows) => {
                out.push_str(&format!(
                    "#{index} ok      {sql} ({} rows, {} affected, {} ms)\n",
                    rows.row_count(),
                    rows.rows_affected,
                    rows.execution_time.as_millis()
                ));
                render_rows(&mut out, rows);
            }
            Outcome::Failed(error) => {
                out.push_str(&format!("#{index} FAILED  {sql}\n"));
                out.push_str(&format!("    {}: ", error.kind.as_str()));
                if let Some(code) = &error.code {
                    out.push_str(&format!("[{code}] "));
                }
                out.push_str(&error.message.replace('\n', "\n    "));
                out.push('\n');
            }
            Outcome::Skipped { reason } => {
                let reason = match reason {
                    SkipReason::PriorFailure => "earlier query failed",
                    SkipReason::DeadlineExceeded => "deadline exceeded",
                    SkipReason::Cancelled => "cancelled",
                    SkipReason::TransactionAborted => "transaction ended early",
                };
                out.push_str(&format!("#{index} skipped {sql} ({reason})\n"));
            }
        }
    }

    out.push_str(&format!(
        "{} succeeded, {} failed, {} skipped in {} ms ({})",
        result.success_count(),
        result.failure_count(),
        result.skipped_count(),
        result.total_time.as_millis(),
        result.policy
    ));
    if result.transactional {
        out.push_str(if result.rolled_back {
            ", rolled back"
        } else {
            ", committed"
        });
    }
    out.push('\n');
    out
}

fn render_rows(out: &mut String, rows: &RowSet) {
    if rows.is_empty() {
        return;
    }
    let header: Vec<&str> = rows.columns.iter().map(|c| c.name.as_str()).collect();
    out.push_str("    ");
    out.push_str(&header.join("\t"));
    out.push('\n');
    for row in &rows.rows {
        let cells: Vec<String> = row.iter().map(|v| v.to_display_string()).collect();
        out.push_str("    ");
        out.push_str(&cells.join("\t"));
        out.push('\n');
    }
}

fn one_line(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}
