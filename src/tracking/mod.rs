//! File-backed experiment tracking.
//!
//! Layout under the tracking root:
//!
//! ```text
//! <experiment>/meta.json
//! <experiment>/<run>/meta.json
//! <experiment>/<run>/metrics/<key>     "<unix ms> <value> <step>" per line
//! <experiment>/<run>/params/<key>
//! <experiment>/<run>/tags/<key>
//! <experiment>/<run>/artifacts/
//! ```
mod experiment;
mod run;

pub use experiment::*;
pub use run::*;

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn key(key: &str) -> anyhow::Result<&str> {
    anyhow::ensure!(
        !key.is_empty()
            && key != "."
            && key != ".."
            && !key.contains(['/', '\\']),
        "invalid tracking key {:?}",
        key
    );
    Ok(key)
}
