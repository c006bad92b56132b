pub mod file;
pub mod stdin;

use serde::de::DeserializeOwned;

/// Reads `T` from `--input <file>`, falling back to piped stdin.
pub fn file_or_stdin<T: DeserializeOwned>(
    path: Option<&str>,
    what: &str,
) -> Result<T, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        return file::read_json(path);
    }
    match stdin::read_stdin()? {
        Some(data) => Ok(serde_json::from_value(data)?),
        None => Err(format!("--input <file.json> or stdin required for {what}").into()),
    }
}
