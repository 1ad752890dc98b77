// Manifest file loading
//
// One manifest per file for keyed categories; route files hold ordered
// lists and concatenate in filename order. YAML is the native format;
// JSON files parse through the same path (YAML is a superset).
//
// `${VAR}` placeholders expand from the environment before parsing, so
// API keys live in the environment rather than in manifest files. An
// unset variable leaves the placeholder untouched.

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use relay_core::error::{GatewayError, Result};
use relay_core::tools::routes::ProcessRoute;

const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Manifest files in `dir`, sorted by filename for deterministic order.
/// A missing directory is an empty category, not an error.
async fn manifest_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "plugin category directory absent");
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(GatewayError::plugin(format!(
                "cannot read plugin directory {}: {e}",
                dir.display()
            )))
        }
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| {
        GatewayError::plugin(format!("cannot list plugin directory {}: {e}", dir.display()))
    })? {
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext));
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Expand `${VAR}` placeholders from the environment; unset variables are
/// left verbatim so the parse error (or downstream 401) names them.
fn expand_env_placeholders(contents: &str) -> String {
    let mut out = String::with_capacity(contents.len());
    let mut rest = contents;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

async fn parse_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        GatewayError::plugin(format!("cannot read manifest {}: {e}", path.display()))
    })?;
    let expanded = expand_env_placeholders(&contents);
    serde_yaml::from_str(&expanded).map_err(|e| {
        GatewayError::plugin(format!("invalid manifest {}: {e}", path.display()))
    })
}

/// Load a keyed category: one manifest per file, keyed by `key_of`.
/// Duplicate keys are an error naming both the key and the file.
pub async fn load_keyed_category<T: DeserializeOwned>(
    dir: &Path,
    key_of: impl Fn(&T) -> String,
) -> Result<HashMap<String, T>> {
    let mut map = HashMap::new();
    for path in manifest_files(dir).await? {
        let manifest: T = parse_file(&path).await?;
        let key = key_of(&manifest);
        if map.insert(key.clone(), manifest).is_some() {
            return Err(GatewayError::plugin(format!(
                "duplicate manifest key {key} in {}",
                path.display()
            )));
        }
    }
    debug!(dir = %dir.display(), count = map.len(), "loaded plugin category");
    Ok(map)
}

/// Load route files: each file is an ordered list; files concatenate in
/// filename order.
pub async fn load_route_files(dir: &Path) -> Result<Vec<ProcessRoute>> {
    let mut routes = Vec::new();
    for path in manifest_files(dir).await? {
        let mut file_routes: Vec<ProcessRoute> = parse_file(&path).await?;
        routes.append(&mut file_routes);
    }
    debug!(dir = %dir.display(), count = routes.len(), "loaded process routes");
    Ok(routes)
}
