use serde_json::Value;

use super::{is_report, scalar};

/// Print just the key answer of the output.
///
/// Reports print their redemption value (or why it could not be computed);
/// other commands print the first well-known field present.
pub fn print_minimal(value: &Value) {
    if is_report(value) {
        println!("{}", redemption_line(&value["redemption"]));
        return;
    }

    if let Value::Array(items) = value {
        for item in items {
            println!("{}", scalar(item.get("name").unwrap_or(item), "null"));
        }
        return;
    }

    let result_obj = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    let priority_keys = ["value", "performance", "status", "distance"];

    if let Value::Object(map) = result_obj {
        for key in &priority_keys {
            if let Some(val) = map.get(*key) {
                if !val.is_null() {
                    println!("{}", scalar(val, "null"));
                    return;
                }
            }
        }
        if let Some((key, val)) = map.iter().next() {
            println!("{}: {}", key, scalar(val, "null"));
            return;
        }
    }

    println!("{}", scalar(result_obj, "null"));
}

fn redemption_line(block: &Value) -> String {
    match block.get("status").and_then(Value::as_str) {
        Some("calculated") => scalar(&block["value"], "null"),
        _ => format!(
            "cannot_calculate: {}",
            scalar(block.get("reason").unwrap_or(&Value::Null), "unknown")
        ),
    }
}
