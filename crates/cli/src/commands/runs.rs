//! Profiling run commands

use anyhow::Result;
use colored::Colorize;

use crate::client::{ApiClient, JobParams};
use crate::output::{print_heading, print_json, print_success, print_table, FieldRow, OutputFormat};

/// Target of a run command
pub struct Target<'a> {
    pub namespace: &'a str,
    pub pod: &'a str,
    pub pid: &'a str,
}

impl Target<'_> {
    fn heading(&self, title: &str) {
        print_heading(title);
        println!("Namespace: {}", self.namespace.cyan());
        println!("Pod:       {}", self.pod.cyan());
        println!("PID:       {}", self.pid.cyan());
        println!();
    }
}

/// Start a profiling run
pub async fn run(
    client: &ApiClient,
    target: &Target<'_>,
    params: &JobParams,
    format: OutputFormat,
) -> Result<()> {
    let ack = client
        .run_job(target.namespace, target.pod, target.pid, params)
        .await?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "message": ack }))?,
        OutputFormat::Table => print_success(&ack),
    }
    Ok(())
}

/// Show the stored sampling parameters of a run
pub async fn show_params(client: &ApiClient, target: &Target<'_>, format: OutputFormat) -> Result<()> {
    let params = client
        .get_params(target.namespace, target.pod, target.pid)
        .await?;

    match format {
        OutputFormat::Json => print_json(&params)?,
        OutputFormat::Table => {
            target.heading("Profiling Parameters");
            let rows = vec![
                FieldRow::new("Frequency", params.freq),
                FieldRow::new("Iterations", params.iter),
                FieldRow::new("Percentile", params.pert),
            ];
            print_table(&rows, format);
        }
    }
    Ok(())
}

/// Show the posted result of a run
pub async fn show_result(client: &ApiClient, target: &Target<'_>, format: OutputFormat) -> Result<()> {
    let result = client
        .get_result(target.namespace, target.pod, target.pid)
        .await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            target.heading("Profiling Result");
            let rows = vec![
                FieldRow::new("CPU", result.cpu.green()),
                FieldRow::new("Memory", result.ram.green()),
                FieldRow::new("Ingress", &result.ingress),
                FieldRow::new("Egress", &result.egress),
            ];
            print_table(&rows, format);
        }
    }
    Ok(())
}

/// Remove a run's stored values and its Job
pub async fn close(client: &ApiClient, target: &Target<'_>, format: OutputFormat) -> Result<()> {
    let ack = client
        .close_run(target.namespace, target.pod, target.pid)
        .await?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "message": ack }))?,
        OutputFormat::Table => print_success(&ack),
    }
    Ok(())
}
