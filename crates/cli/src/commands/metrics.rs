//! Custom metrics query commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{print_json, print_table, print_warning, OutputFormat};

/// Row for the discovery table
#[derive(Tabled, serde::Serialize)]
struct MetricRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Namespaced")]
    namespaced: bool,
}

/// Row for the values table
#[derive(Tabled, serde::Serialize)]
struct ValueRow {
    #[tabled(rename = "Object")]
    object: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Timestamp")]
    timestamp: String,
}

/// List every metric the adapter currently serves
pub async fn list(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let list = client.list_metrics().await?;

    if let OutputFormat::Json = format {
        return print_json(&list);
    }

    let rows: Vec<MetricRow> = list
        .resources
        .into_iter()
        .map(|r| {
            let (resource, metric) = r
                .name
                .split_once('/')
                .map(|(res, met)| (res.to_string(), met.to_string()))
                .unwrap_or_else(|| (String::new(), r.name.clone()));
            MetricRow {
                resource,
                metric,
                namespaced: r.namespaced,
            }
        })
        .collect();
    print_table(&rows, format);
    Ok(())
}

/// Query one metric by object name, or by label selector when `name` is `*`
pub async fn get(
    client: &ApiClient,
    namespace: &str,
    resource: &str,
    name: &str,
    metric: &str,
    selector: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let list = client
        .get_metric(namespace, resource, name, metric, selector)
        .await?;

    if let OutputFormat::Json = format {
        return print_json(&list);
    }

    if list.items.is_empty() {
        print_warning("No stored values matched");
        return Ok(());
    }

    let rows: Vec<ValueRow> = list
        .items
        .into_iter()
        .map(|item| ValueRow {
            object: format!(
                "{}/{}",
                item.described_object.namespace, item.described_object.name
            ),
            metric: item.metric.name,
            value: item.value,
            timestamp: format_timestamp(&item.timestamp),
        })
        .collect();
    print_table(&rows, format);
    Ok(())
}

/// Sample time as `YYYY-MM-DD HH:MM:SS`, or the raw text if unparsable
fn format_timestamp(ts: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(ts) {
        Ok(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        Err(_) => ts.to_string(),
    }
}
