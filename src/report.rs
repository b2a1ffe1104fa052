//! Report files written at the end of a run.
//!
//! The format is chosen by the file extension: `.json` holds the summary and every
//! sample, `.csv` holds one row per sample, and `.md` is a human readable summary.

use chrono::SecondsFormat;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::metrics::{MetricSample, RunSummary};
use crate::GoslingError;

/// Supported report file formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Csv,
    Markdown,
}
impl ReportFormat {
    /// Determine the report format from a file name.
    pub fn from_path(path: &str) -> Result<Self, GoslingError> {
        let extension = Path::new(path)
            .extension()
            .and_then(|extension| extension.to_str())
            .map(|extension| extension.to_lowercase());
        match extension.as_deref() {
            Some("json") => Ok(ReportFormat::Json),
            Some("csv") => Ok(ReportFormat::Csv),
            Some("md") | Some("markdown") => Ok(ReportFormat::Markdown),
            _ => Err(GoslingError::InvalidConfig {
                option: "`configuration.report_file`".to_string(),
                value: path.to_string(),
                detail: "report file must end in .json, .csv or .md.".to_string(),
            }),
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'r> {
    summary: &'r RunSummary,
    samples: &'r [MetricSample],
}

/// Render a report into `w`.
pub fn render<W: Write>(
    w: &mut W,
    format: ReportFormat,
    summary: &RunSummary,
    samples: &[MetricSample],
) -> Result<(), GoslingError> {
    match format {
        ReportFormat::Json => {
            serde_json::to_writer_pretty(&mut *w, &JsonReport { summary, samples })
                .map_err(std::io::Error::from)?;
            writeln!(w)?;
        }
        ReportFormat::Csv => write_csv(w, samples)?,
        ReportFormat::Markdown => Markdown { w, summary, samples }.write()?,
    }
    Ok(())
}

/// Write a report to `path`, in the format its extension names.
pub async fn write_report(
    path: &str,
    summary: &RunSummary,
    samples: &[MetricSample],
) -> Result<(), GoslingError> {
    let format = ReportFormat::from_path(path)?;
    let mut buffer = Vec::new();
    render(&mut buffer, format, summary, samples)?;

    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(&buffer).await?;
    file.flush().await?;
    info!("wrote {:?} report to {}", format, path);
    Ok(())
}

fn write_csv<W: Write>(w: &mut W, samples: &[MetricSample]) -> Result<(), GoslingError> {
    writeln!(
        w,
        "tick,timestamp,active_users,requests,errors,average_latency,p95_latency,p99_latency,requests_per_second,error_rate"
    )?;
    for sample in samples {
        writeln!(
            w,
            "{},{},{},{},{},{:.3},{:.3},{:.3},{:.3},{:.3}",
            sample.tick,
            sample.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            sample.active_users,
            sample.requests,
            sample.errors,
            sample.average_latency,
            sample.p95_latency,
            sample.p99_latency,
            sample.requests_per_second,
            sample.error_rate,
        )?;
    }
    Ok(())
}

struct Markdown<'r, 'w, W: Write> {
    w: &'w mut W,
    summary: &'r RunSummary,
    samples: &'r [MetricSample],
}

impl<W: Write> Markdown<'_, '_, W> {
    fn write(mut self) -> Result<(), GoslingError> {
        self.write_header()?;
        self.write_request_metrics()?;
        self.write_latency_metrics()?;
        self.write_status_code_metrics()?;
        self.write_error_metrics()?;
        self.write_samples()?;

        Ok(())
    }

    fn write_header(&mut self) -> Result<(), GoslingError> {
        let duration = self.summary.finished - self.summary.started;
        writeln!(
            self.w,
            r#"
# Gosling Report

| State | Started | Finished | Elapsed (s) | Ticks |
| ----- | ------- | -------- | ----------: | ----: |
| {} | {} | {} | {:.1} | {} |"#,
            self.summary.state,
            self.summary.started.format("%y-%m-%d %H:%M:%S"),
            self.summary.finished.format("%y-%m-%d %H:%M:%S"),
            duration.num_milliseconds() as f64 / 1_000.0,
            self.summary.ticks,
        )?;

        Ok(())
    }

    fn write_request_metrics(&mut self) -> Result<(), GoslingError> {
        writeln!(
            self.w,
            r#"
## Request Metrics

| # Requests | # Success | # Errors | RPS |
| ---------: | --------: | -------: | --: |
| {} | {} | {} | {:.2} |"#,
            self.summary.total_requests,
            self.summary.success_count,
            self.summary.error_count,
            self.summary.requests_per_second,
        )?;

        Ok(())
    }

    fn write_latency_metrics(&mut self) -> Result<(), GoslingError> {
        writeln!(
            self.w,
            r#"
## Latency Metrics

| Average (ms) | Min (ms) | Max (ms) | p95 (ms) | p99 (ms) |
| -----------: | -------: | -------: | -------: | -------: |
| {:.2} | {:.2} | {:.2} | {:.2} | {:.2} |"#,
            self.summary.average_latency,
            self.summary.min_latency,
            self.summary.max_latency,
            self.summary.p95_latency,
            self.summary.p99_latency,
        )?;

        Ok(())
    }

    fn write_status_code_metrics(&mut self) -> Result<(), GoslingError> {
        if self.summary.status_codes.is_empty() {
            return Ok(());
        }

        write!(
            self.w,
            r#"
## Status Code Metrics

| Status Code | # Responses |
| ----------- | ----------: |
"#
        )?;
        for (code, count) in &self.summary.status_codes {
            writeln!(self.w, "| {} | {} |", code, count)?;
        }

        Ok(())
    }

    fn write_error_metrics(&mut self) -> Result<(), GoslingError> {
        if self.summary.errors.is_empty() {
            return Ok(());
        }

        write!(
            self.w,
            r#"
## Errors

| # Times | Error |
| ------: | ----- |
"#
        )?;
        for (error, count) in &self.summary.errors {
            // Pipes would break the table.
            writeln!(self.w, "| {} | {} |", count, error.replace('|', "\\|"))?;
        }

        Ok(())
    }

    fn write_samples(&mut self) -> Result<(), GoslingError> {
        write!(
            self.w,
            r#"
## Samples

| Tick | Users | Requests | Errors | Average (ms) | p95 (ms) | p99 (ms) | RPS | Error Rate (%) |
| ---: | ----: | -------: | -----: | -----------: | -------: | -------: | --: | -------------: |
"#
        )?;
        for sample in self.samples {
            writeln!(
                self.w,
                "| {} | {} | {} | {} | {:.2} | {:.2} | {:.2} | {:.2} | {:.2} |",
                sample.tick,
                sample.active_users,
                sample.requests,
                sample.errors,
                sample.average_latency,
                sample.p95_latency,
                sample.p99_latency,
                sample.requests_per_second,
                sample.error_rate,
            )?;
        }

        Ok(())
    }
}
