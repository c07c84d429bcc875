//! DSN parsing: splitting a connection string into a database path and
//! engine parameters.
//!
//! Grammar: `[file:]<path>[?key=value[&key=value]...]`. An empty string or
//! the literal `:memory:` selects an in-memory database. Parsing never
//! fails; query fragments that do not look like `key=value` are dropped.

use std::collections::BTreeMap;

/// Path sentinel for an in-memory database.
pub(crate) const MEMORY_PATH: &str = ":memory:";

/// Key under which the bare `--` separator flag is stored when `udf_path`
/// expansion inserts one. Sorts ahead of every other parameter name.
pub(crate) const ARG_SEPARATOR_KEY: &str = "--";

/// Split `dsn` into a resolved database path and its parameter map.
///
/// Rules, in order:
/// 1. empty input or `:memory:` selects the in-memory sentinel, no params;
/// 2. a leading `file:` prefix is stripped and leading `//` collapsed to `/`;
/// 3. everything after the first `?` is parsed as `&`-separated `key=value`
///    pairs, the last occurrence of a key winning; pairs without `=` or with
///    an empty key are dropped;
/// 4. `udf_path=<dir>` expands to the separator flag plus
///    `user_scripts_path` and `user_defined_executable_functions_config`;
/// 5. a relative path is resolved against the current working directory.
pub(crate) fn parse(dsn: &str) -> (String, BTreeMap<String, String>) {
    if dsn.is_empty() || dsn == MEMORY_PATH {
        return (MEMORY_PATH.to_string(), BTreeMap::new());
    }

    let mut rest = dsn.strip_prefix("file:").unwrap_or(dsn);
    while rest.starts_with("//") {
        rest = &rest[1..];
    }

    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };

    let mut params = BTreeMap::new();
    if let Some(query) = query {
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some((k, v)) if !k.is_empty() => {
                    params.insert(k.to_string(), v.to_string());
                }
                // No `=` or empty key: tolerated, dropped.
                _ => {}
            }
        }
    }

    if let Some(udf) = params.remove("udf_path") {
        if !udf.is_empty() {
            let config = format!("{udf}/*.xml");
            params.insert(ARG_SEPARATOR_KEY.to_string(), String::new());
            params.insert("user_scripts_path".to_string(), udf);
            params.insert("user_defined_executable_functions_config".to_string(), config);
        }
    }

    (resolve_path(path), params)
}

/// Absolutize `path` unless it is empty, the memory sentinel, or already
/// absolute. An empty path falls back to the sentinel so a bare `file:?...`
/// DSN still selects an in-memory database.
fn resolve_path(path: &str) -> String {
    if path.is_empty() {
        return MEMORY_PATH.to_string();
    }
    if path == MEMORY_PATH || std::path::Path::new(path).is_absolute() {
        return path.to_string();
    }
    match std::path::absolute(path) {
        Ok(abs) => abs.to_string_lossy().into_owned(),
        Err(_) => path.to_string(),
    }
}
