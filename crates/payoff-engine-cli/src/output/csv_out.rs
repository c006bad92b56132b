use serde_json::Value;
use std::io;

use super::{is_report, scalar};

type StdoutWriter<'a> = csv::Writer<io::StdoutLock<'a>>;

/// Write output as CSV to stdout.
///
/// Reports are written one row per underlying; envelopes and flat objects
/// as `field,value` pairs; arrays as one row per element.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());

    match value {
        v if is_report(v) => {
            if let Some(Value::Array(rows)) = v.get("underlyings") {
                write_array_csv(&mut wtr, rows);
            }
        }
        Value::Object(map) => {
            let fields = match map.get("result") {
                Some(Value::Object(result)) => result,
                _ => map,
            };
            let _ = wtr.write_record(["field", "value"]);
            for (key, val) in fields {
                let _ = wtr.write_record([key.as_str(), &scalar(val, "")]);
            }
        }
        Value::Array(arr) => write_array_csv(&mut wtr, arr),
        _ => {
            let _ = wtr.write_record([&scalar(value, "")]);
        }
    }

    let _ = wtr.flush();
}

fn write_array_csv(wtr: &mut StdoutWriter<'_>, arr: &[Value]) {
    let Some(Value::Object(first)) = arr.first() else {
        for item in arr {
            let _ = wtr.write_record([&scalar(item, "")]);
        }
        return;
    };

    let headers: Vec<&str> = first.keys().map(|k| k.as_str()).collect();
    let _ = wtr.write_record(&headers);
    for item in arr {
        if let Value::Object(map) = item {
            let row: Vec<String> = headers
                .iter()
                .map(|h| map.get(*h).map(|v| scalar(v, "")).unwrap_or_default())
                .collect();
            let _ = wtr.write_record(&row);
        }
    }
}
