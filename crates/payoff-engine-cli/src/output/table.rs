use serde_json::Value;
use tabled::{builder::Builder, Table};

use super::{is_report, scalar};

/// Format output as tables using the tabled crate.
pub fn print_table(value: &Value) {
    match value {
        v if is_report(v) => print_report(v),
        Value::Object(map) => match map.get("result") {
            Some(result) => print_envelope(result, map),
            None => print_fields(map),
        },
        Value::Array(arr) => print_rows(arr, None),
        _ => println!("{}", value),
    }
}

fn print_report(report: &Value) {
    let redemption = &report["redemption"];
    let redemption_text = match redemption.get("status").and_then(Value::as_str) {
        Some("calculated") => format!(
            "{} ({})",
            scalar(&redemption["value"], "-"),
            scalar(&redemption["kind"], "-")
        ),
        _ => format!(
            "cannot calculate: {}",
            scalar(redemption.get("reason").unwrap_or(&Value::Null), "-")
        ),
    };

    let mut builder = Builder::default();
    builder.push_record(["Field", "Value"]);
    builder.push_record(["product", &scalar(&report["product_id"], "-")]);
    builder.push_record(["template", &scalar(&report["structure"]["template"], "-")]);
    builder.push_record(["status", &scalar(&report["status"]["status"], "-")]);
    builder.push_record(["as_of", &scalar(&report["status"]["as_of"], "-")]);
    builder.push_record([
        "next_observation",
        &scalar(&report["status"]["next_observation"], "-"),
    ]);
    builder.push_record(["basket_rule", &scalar(&report["basket"]["rule"], "-")]);
    builder.push_record([
        "basket_performance",
        &scalar(&report["basket"]["performance"], "-"),
    ]);
    builder.push_record(["redemption", &redemption_text]);
    builder.push_record(["coupons_paid", &scalar(&report["coupons"]["total_paid"], "-")]);
    builder.push_record([
        "processing_status",
        &scalar(&report["issues"]["processing_status"], "-"),
    ]);
    println!("{}", Table::from(builder));

    if let Some(Value::Array(rows)) = report.get("underlyings") {
        println!("\nUnderlyings:");
        print_rows(
            rows,
            Some(&[
                "ticker",
                "strike",
                "evaluation_price",
                "price_source",
                "performance",
                "locked",
                "is_worst",
            ]),
        );
        let barriers: Vec<String> = rows
            .iter()
            .filter_map(|r| {
                let status = r.get("capital_barrier")?.get("status")?;
                Some(format!("{}: {}", scalar(&r["ticker"], "-"), scalar(status, "-")))
            })
            .collect();
        if !barriers.is_empty() {
            println!("Capital barrier: {}", barriers.join(", "));
        }
    }

    if let Some(Value::Array(rows)) = report["coupons"].get("observations") {
        if !rows.is_empty() {
            println!("\nObservations:");
            print_rows(rows, None);
        }
    }

    if redemption.get("status").and_then(Value::as_str) == Some("calculated") {
        if let Some(Value::Array(lines)) = redemption.get("explanation") {
            println!("\nRedemption:");
            for line in lines {
                println!("  {}", scalar(line, ""));
            }
        }
    }

    if let Some(Value::Array(issues)) = report["issues"].get("issues") {
        if !issues.is_empty() {
            println!("\nIssues:");
            for issue in issues {
                println!(
                    "  [{}] {}: {}",
                    scalar(&issue["severity"], "-"),
                    scalar(&issue["type"], "-"),
                    scalar(&issue["message"], "")
                );
            }
        }
    }
}

fn print_envelope(result: &Value, envelope: &serde_json::Map<String, Value>) {
    match result {
        Value::Object(res_map) => print_fields(res_map),
        _ => print_fields(envelope),
    }

    if let Some(Value::Array(warnings)) = envelope.get("warnings") {
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in warnings {
                println!("  - {}", scalar(w, ""));
            }
        }
    }

    if let Some(Value::String(meth)) = envelope.get("methodology") {
        println!("\nMethodology: {}", meth);
    }
}

fn print_fields(map: &serde_json::Map<String, Value>) {
    let mut builder = Builder::default();
    builder.push_record(["Field", "Value"]);
    for (key, val) in map {
        builder.push_record([key.as_str(), &scalar(val, "null")]);
    }
    println!("{}", Table::from(builder));
}

/// One row per element. `columns` restricts and orders the headers; by
/// default the first element's keys are used.
fn print_rows(arr: &[Value], columns: Option<&[&str]>) {
    if arr.is_empty() {
        println!("(empty)");
        return;
    }

    let Some(Value::Object(first)) = arr.first() else {
        for item in arr {
            println!("{}", scalar(item, "null"));
        }
        return;
    };

    let headers: Vec<String> = match columns {
        Some(cols) => cols.iter().map(|c| c.to_string()).collect(),
        None => first.keys().cloned().collect(),
    };
    let mut builder = Builder::default();
    builder.push_record(headers.clone());
    for item in arr {
        if let Value::Object(map) = item {
            let row: Vec<String> = headers
                .iter()
                .map(|h| map.get(h.as_str()).map(|v| scalar(v, "-")).unwrap_or_default())
                .collect();
            builder.push_record(row);
        }
    }
    println!("{}", Table::from(builder));
}
