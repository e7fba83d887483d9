//! Layered configuration resolution.
//!
//! Supervisor options come from built-in defaults overlaid with up to three
//! `.devmon.json` documents (home directory, working directory, script
//! directory) and finally any options given on the command line. Every option
//! key is declared once in the [`Schema`] with a merge kind, and layers are
//! folded with the rule for that kind: lists concatenate, mappings merge
//! shallowly, scalars replace. A missing file is an empty layer; a present
//! but malformed file aborts resolution.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};

/// Conventional configuration file name looked up in each layer directory.
pub const CONFIG_FILE: &str = ".devmon.json";

/// Merge rule and command-line arity of one option key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Boolean scalar; a flag taking no value on the command line.
    Bool,
    /// Numeric scalar; a flag taking a numeric value.
    Number,
    /// String scalar; a flag taking a string value.
    String,
    /// Ordered list of strings; repeatable on the command line, layers
    /// concatenate in order.
    List,
    /// String-to-string mapping; not settable from the command line, layers
    /// merge key by key.
    Map,
}

/// One declared option: key, merge kind, built-in default.
#[derive(Debug, Clone)]
pub struct SchemaEntry {
    pub key: &'static str,
    pub kind: Kind,
    pub default: Value,
}

/// The declared set of supervisor options.
///
/// The schema drives both the merge (each key's kind picks the fold rule)
/// and the first command-line pass (each key's kind picks the flag arity).
/// It is built once and threaded by reference; there is no global state.
#[derive(Debug, Clone)]
pub struct Schema {
    entries: Vec<SchemaEntry>,
}

fn entry(key: &'static str, kind: Kind, default: Value) -> SchemaEntry {
    SchemaEntry { key, kind, default }
}

impl Schema {
    /// The built-in option set with its default values.
    pub fn builtin() -> Self {
        let entries = vec![
            entry("clear", Kind::Bool, json!(false)),
            entry("debounce", Kind::Number, json!(10)),
            entry("dedupe", Kind::Bool, json!(false)),
            entry("deps", Kind::Number, json!(1)),
            entry(
                "extensions",
                Kind::Map,
                json!({
                    "coffee": "coffeescript/register",
                    "ls": "LiveScript",
                    "ts": "ts-node/register",
                }),
            ),
            entry("fork", Kind::Bool, json!(true)),
            entry("graceful_ipc", Kind::String, json!("")),
            entry("ignore", Kind::List, json!([])),
            entry("interval", Kind::Number, json!(1000)),
            entry("notify", Kind::Bool, json!(true)),
            entry("poll", Kind::Bool, json!(false)),
            entry("respawn", Kind::Bool, json!(false)),
            entry("timestamp", Kind::String, json!("HH:MM:ss")),
            entry("vm", Kind::Bool, json!(true)),
        ];
        Self { entries }
    }

    /// The declared kind of `key`, if the key is known.
    pub fn kind(&self, key: &str) -> Option<Kind> {
        self.entries.iter().find(|e| e.key == key).map(|e| e.kind)
    }

    /// Option names declared with the given kind, for grammar construction.
    pub fn keys_of(&self, kind: Kind) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.key)
            .collect()
    }

    /// Defaults as a fresh JSON map, the base of every merge.
    pub fn defaults(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|e| (e.key.to_string(), e.default.clone()))
            .collect()
    }
}

/// Folds one layer into `target`, dispatching on each key's declared kind.
///
/// Keys absent from the layer are left alone (absence is not a falsy value),
/// and `null` values count as absent. Keys unknown to the schema replace
/// like scalars. List merging does not deduplicate; duplicate handling is
/// the watch engine's `dedupe` option, a separate concern.
pub fn merge(schema: &Schema, target: &mut Map<String, Value>, layer: Map<String, Value>) {
    for (key, value) in layer {
        if value.is_null() {
            continue;
        }
        match schema.kind(&key) {
            Some(Kind::List) => {
                let mut items = match target.remove(&key) {
                    Some(Value::Array(items)) => items,
                    Some(other) => vec![other],
                    None => Vec::new(),
                };
                match value {
                    Value::Array(more) => items.extend(more),
                    scalar => items.push(scalar),
                }
                target.insert(key, Value::Array(items));
            }
            Some(Kind::Map) => {
                let mut map = match target.remove(&key) {
                    Some(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                match value {
                    Value::Object(overlay) => {
                        for (k, v) in overlay {
                            map.insert(k, v);
                        }
                    }
                    other => warn!("ignoring non-mapping value for {key}: {other}"),
                }
                target.insert(key, Value::Object(map));
            }
            _ => {
                target.insert(key, value);
            }
        }
    }
}

/// Reads the configuration layer from `dir`, or an empty layer if the file
/// does not exist.
fn read_layer(dir: &Path) -> Result<Map<String, Value>> {
    let path = dir.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(Map::new());
    }
    let raw = std::fs::read_to_string(&path).map_err(|source| Error::ConfigRead {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| Error::ConfigParse { path, source })
}

/// Resolves the merged configuration map for `script`: built-in defaults
/// overlaid with the home, working-directory, and script-directory layers,
/// in that order. The result contains every declared key.
pub fn resolve(schema: &Schema, script: &str) -> Result<Map<String, Value>> {
    let mut locations: Vec<PathBuf> = Vec::new();
    if let Some(home) = dirs::home_dir() {
        locations.push(home);
    }
    locations.push(PathBuf::from("."));
    locations.push(anchor_dir(script));

    let mut merged = schema.defaults();
    for dir in locations {
        let layer = read_layer(&dir)?;
        if !layer.is_empty() {
            debug!("config layer {}: {} keys", dir.display(), layer.len());
        }
        merge(schema, &mut merged, layer);
    }
    Ok(merged)
}

/// Directory anchoring script-local configuration: the script's parent when
/// the script resolves to a real file, the working directory otherwise.
fn anchor_dir(script: &str) -> PathBuf {
    let path = Path::new(script);
    if path.is_file() {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    } else {
        PathBuf::from(".")
    }
}

/// Effective supervisor configuration, total over every declared option.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Clear the screen on restart.
    pub clear: bool,
    /// Debounce interval for watch events (ms).
    pub debounce: u64,
    /// Drop duplicate watch events.
    pub dedupe: bool,
    /// Dependency depth tracked for restarts.
    pub deps: u32,
    /// File-extension-to-loader associations (file-only).
    pub extensions: BTreeMap<String, String>,
    /// Fork the script as a child process instead of running in-process.
    pub fork: bool,
    /// IPC message asking the child to shut down gracefully.
    pub graceful_ipc: String,
    /// Paths excluded from dependency watching.
    pub ignore: Vec<String>,
    /// Polling interval when polling is enabled (ms).
    pub interval: u64,
    /// Show desktop notifications on restart and crash.
    pub notify: bool,
    /// Use polling instead of native file-system events.
    pub poll: bool,
    /// Restart the script when it crashes.
    pub respawn: bool,
    /// Timestamp format for log lines.
    pub timestamp: String,
    /// Hook the VM module to track dynamically loaded dependencies.
    pub vm: bool,
}

impl Config {
    /// Materializes a merged map into the typed configuration.
    pub fn from_map(map: Map<String, Value>) -> Result<Self> {
        serde_json::from_value(Value::Object(map)).map_err(Error::InvalidConfig)
    }
}
