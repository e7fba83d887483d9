//! Command-line disambiguation.
//!
//! A devmon invocation mixes three groups of tokens without explicit
//! delimiters: supervisor options, node options, and the script with its
//! arguments. The line is split with two passes over the raw tokens. The
//! first pass recognizes only the declared supervisor options and defers
//! every other token; the second recognizes node options among the deferred
//! tokens and halts at the first positional, which is the script. Everything
//! after the script is passed through byte for byte, never re-parsed.

use std::collections::BTreeMap;
use std::env;
use std::path::Path;

use log::debug;
use serde_json::{Map, Value};

use crate::config::{self, Config, Kind, Schema};
use crate::error::{Error, Result};

/// Marker stored for an ambiguous flag given without `=value`; re-emitted as
/// a bare flag by [`stringify`]. Never leaves this module.
const BARE: &str = "\0";

/// Node options that take a value only with an explicit `=`.
const AMBIGUOUS: &[&str] = &["inspect", "inspect-brk"];

/// Node flags commonly given before the script. Declaring them as booleans
/// keeps a bare flag from swallowing the script token as its value:
/// `devmon --expose_gc script.js` is only parseable because `expose_gc` is
/// known to take no value.
const NODE_BOOLEANS: &[&str] = &[
    "expose_gc",
    "preserve-symlinks",
    "no-deprecation",
    "no-warnings",
];

/// Node flags taking a string value.
const NODE_STRINGS: &[&str] = &["require", "inspect", "inspect-brk"];

/// One parsed occurrence of a flag.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    Flag(bool),
    Text(String),
}

impl Arg {
    fn into_text(self) -> String {
        match self {
            Arg::Flag(value) => value.to_string(),
            Arg::Text(text) => text,
        }
    }
}

/// Result of one tokenizer pass.
#[derive(Debug, Default)]
struct Parsed {
    opts: BTreeMap<String, Vec<Arg>>,
    positionals: Vec<String>,
    /// Tokens following a `--` seen before the halt, kept apart so they can
    /// be re-attached to the script arguments.
    separated: Option<Vec<String>>,
}

impl Parsed {
    // booleans follow the runtime's last-flag-wins convention at parse time
    fn set_bool(&mut self, name: &str, value: bool) {
        self.opts.insert(name.to_string(), vec![Arg::Flag(value)]);
    }

    fn push_text(&mut self, name: &str, value: String) {
        self.opts
            .entry(name.to_string())
            .or_default()
            .push(Arg::Text(value));
    }
}

/// Declarative grammar for one tokenizer pass. Option names are literal (no
/// camel-case or dotted expansion) and positionals are never coerced to
/// numbers.
struct Grammar {
    booleans: Vec<&'static str>,
    numbers: Vec<&'static str>,
    strings: Vec<&'static str>,
    aliases: &'static [(&'static str, &'static str)],
    /// Unknown option-looking tokens become positionals instead of flags.
    unknown_as_positional: bool,
    /// `--no-<flag>` sets a declared boolean to false.
    negation: bool,
    /// Tokens after a pre-halt `--` are captured separately.
    capture_separator: bool,
}

impl Grammar {
    /// Pass-1 grammar, derived from the schema: every CLI-settable option
    /// key becomes a flag with the arity of its kind.
    fn supervisor(schema: &Schema) -> Self {
        let mut strings = schema.keys_of(Kind::String);
        strings.extend(schema.keys_of(Kind::List));
        Self {
            booleans: schema.keys_of(Kind::Bool),
            numbers: schema.keys_of(Kind::Number),
            strings,
            aliases: &[],
            unknown_as_positional: true,
            negation: true,
            capture_separator: true,
        }
    }

    /// Pass-2 grammar for node options. Negation stays disabled so `--no-*`
    /// flags reach node untouched; node interprets them itself.
    fn node() -> Self {
        Self {
            booleans: NODE_BOOLEANS.to_vec(),
            numbers: Vec::new(),
            strings: NODE_STRINGS.to_vec(),
            aliases: &[("r", "require")],
            unknown_as_positional: false,
            negation: false,
            capture_separator: false,
        }
    }

    fn canonical<'a>(&self, name: &'a str) -> &'a str {
        self.aliases
            .iter()
            .find(|(alias, _)| *alias == name)
            .map(|(_, canon)| *canon)
            .unwrap_or(name)
    }

    fn negated(&self, name: &str) -> Option<&'static str> {
        if !self.negation {
            return None;
        }
        let stripped = name.strip_prefix("no-")?;
        self.booleans.iter().copied().find(|flag| *flag == stripped)
    }

    fn takes_value(&self, name: &str) -> bool {
        has(&self.strings, name) || has(&self.numbers, name)
    }

    /// Runs this grammar over `args`. Recognition stops at the first token
    /// that is neither a declared option nor option-prefixed; that token and
    /// everything after it are taken verbatim as positionals (a later `--`
    /// is no longer special).
    fn parse(&self, args: &[String]) -> Parsed {
        let mut out = Parsed::default();
        let mut i = 0;
        while i < args.len() {
            let token = &args[i];
            if token == "--" {
                let rest = args[i + 1..].to_vec();
                if self.capture_separator {
                    out.separated = Some(rest);
                } else {
                    out.positionals.extend(rest);
                }
                break;
            }
            let Some(body) = option_body(token) else {
                // the script boundary: stop recognizing options entirely
                out.positionals.extend(args[i..].iter().cloned());
                break;
            };
            let (name, inline) = match body.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (body, None),
            };
            let name = self.canonical(name);
            if has(&self.booleans, name) {
                let value = inline.map(|v| v != "false").unwrap_or(true);
                out.set_bool(name, value);
            } else if self.takes_value(name) {
                let value = match inline {
                    Some(value) => value,
                    None => take_value(args, &mut i).unwrap_or_default(),
                };
                out.push_text(name, value);
            } else if let Some(flag) = self.negated(name) {
                out.set_bool(flag, false);
            } else if self.unknown_as_positional {
                out.positionals.push(token.clone());
            } else {
                // forward the unknown token as a node flag; a bare flag
                // consumes the next non-option token as its value
                match inline {
                    Some(value) => out.push_text(name, value),
                    None => match take_value(args, &mut i) {
                        Some(value) => out.push_text(name, value),
                        None => out.set_bool(name, true),
                    },
                }
            }
            i += 1;
        }
        out
    }
}

fn has(list: &[&str], name: &str) -> bool {
    list.iter().any(|candidate| *candidate == name)
}

/// The flag name of an option-looking token, `None` for positionals and for
/// the bare `-` stdin convention.
fn option_body(token: &str) -> Option<&str> {
    if token == "--" {
        return None;
    }
    token
        .strip_prefix("--")
        .or_else(|| token.strip_prefix('-'))
        .filter(|body| !body.is_empty())
}

fn looks_like_option(token: &str) -> bool {
    token == "--" || option_body(token).is_some()
}

/// Consumes the token after position `i` as a flag value, when there is one
/// and it does not itself look like an option.
fn take_value(args: &[String], i: &mut usize) -> Option<String> {
    match args.get(*i + 1) {
        Some(next) if !looks_like_option(next) => {
            *i += 1;
            Some(next.clone())
        }
        _ => None,
    }
}

/// Rewrites a bare ambiguous flag (`--inspect`) to carry the internal marker
/// value, so the node pass treats it as having an explicit-but-empty value
/// instead of consuming the following token.
fn mark_ambiguous(args: Vec<String>) -> Vec<String> {
    args.into_iter()
        .map(|arg| {
            let bare = AMBIGUOUS
                .iter()
                .any(|key| arg.strip_prefix("--") == Some(*key));
            if bare {
                format!("{arg}={BARE}")
            } else {
                arg
            }
        })
        .collect()
}

/// Re-attaches the captured `--` tail to the positional list, inserting a
/// literal `--` ahead of it when positionals already exist so the launched
/// runtime does not misread the tail.
fn attach_tail(mut positionals: Vec<String>, tail: Option<Vec<String>>) -> Vec<String> {
    if let Some(tail) = tail {
        if !positionals.is_empty() {
            positionals.push("--".to_string());
        }
        positionals.extend(tail);
    }
    positionals
}

/// Applies the last-flag-wins convention to the supervisor options and turns
/// them into the highest-priority configuration layer. Options declared
/// repeatable keep every occurrence as a list, even a single one; numeric
/// values that do not parse are dropped.
fn normalize(schema: &Schema, opts: BTreeMap<String, Vec<Arg>>) -> Map<String, Value> {
    let mut layer = Map::new();
    for (key, mut values) in opts {
        let Some(kind) = schema.kind(&key) else {
            continue;
        };
        let value = if kind == Kind::List {
            Some(Value::Array(
                values
                    .into_iter()
                    .map(|arg| Value::String(arg.into_text()))
                    .collect(),
            ))
        } else {
            let Some(last) = values.pop() else {
                continue;
            };
            match kind {
                Kind::Bool => match last {
                    Arg::Flag(flag) => Some(Value::Bool(flag)),
                    Arg::Text(_) => None,
                },
                Kind::Number => parse_number(&last.into_text()),
                Kind::String => Some(Value::String(last.into_text())),
                _ => None,
            }
        };
        if let Some(value) = value {
            layer.insert(key, value);
        }
    }
    layer
}

fn parse_number(text: &str) -> Option<Value> {
    if let Ok(n) = text.parse::<u64>() {
        return Some(Value::from(n));
    }
    if let Ok(n) = text.parse::<i64>() {
        return Some(Value::from(n));
    }
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

/// Rebuilds a flat node argument list from the parsed node options. Keys are
/// emitted in stable lexicographic order; node does not care about flag
/// order. Single-character keys get a single dash, a `true` or marker value
/// emits a bare flag, `false` suppresses the flag, and multi-valued options
/// emit one `--key=value` token per occurrence.
fn stringify(opts: &BTreeMap<String, Vec<Arg>>) -> Vec<String> {
    let mut out = Vec::new();
    for (key, values) in opts {
        let prefix = if key.chars().count() == 1 { "-" } else { "--" };
        for arg in values {
            match arg {
                Arg::Flag(true) => out.push(format!("{prefix}{key}")),
                Arg::Flag(false) => {}
                Arg::Text(value) if value == BARE => out.push(format!("{prefix}{key}")),
                Arg::Text(value) => out.push(format!("{prefix}{key}={value}")),
            }
        }
    }
    out
}

/// A command line split into its four groups, before configuration merging.
#[derive(Debug)]
struct Split {
    supervisor_opts: BTreeMap<String, Vec<Arg>>,
    runtime_args: Vec<String>,
    script: String,
    script_args: Vec<String>,
}

/// Splits `argv` with the two grammars and identifies the script token.
fn split(schema: &Schema, argv: &[String]) -> Result<Split> {
    let supervisor = Grammar::supervisor(schema).parse(argv);
    let node = Grammar::node().parse(&mark_ambiguous(supervisor.positionals));

    let mut script_args = attach_tail(node.positionals, supervisor.separated);
    if script_args.is_empty() {
        return Err(Error::Usage);
    }
    let script = script_args.remove(0);

    Ok(Split {
        supervisor_opts: supervisor.opts,
        runtime_args: stringify(&node.opts),
        script,
        script_args,
    })
}

/// Fully disambiguated command line, ready for the launcher.
#[derive(Debug)]
pub struct CommandLine {
    /// Flags forwarded to the node executable ahead of the script.
    pub runtime_args: Vec<String>,
    /// Effective supervisor configuration.
    pub opts: Config,
    /// Path of the script to supervise.
    pub script: String,
    /// Arguments passed to the script verbatim.
    pub script_args: Vec<String>,
}

/// Parses `argv` (program name already stripped) into supervisor options,
/// node options, the script, and its arguments, then resolves the effective
/// configuration with the command-line options as the final layer.
pub fn parse(schema: &Schema, argv: &[String]) -> Result<CommandLine> {
    let split = split(schema, argv)?;

    let mut merged = config::resolve(schema, &split.script)?;
    config::merge(schema, &mut merged, normalize(schema, split.supervisor_opts));
    let mut opts = Config::from_map(merged)?;
    opts.ignore = opts.ignore.iter().map(|path| absolute(path)).collect();

    debug!(
        "script {} with node args {:?} and script args {:?}",
        split.script, split.runtime_args, split.script_args
    );
    Ok(CommandLine {
        runtime_args: split.runtime_args,
        opts,
        script: split.script,
        script_args: split.script_args,
    })
}

/// Resolves an ignore entry against the working directory.
fn absolute(path: &str) -> String {
    let p = Path::new(path);
    if p.is_absolute() {
        return path.to_string();
    }
    match env::current_dir() {
        Ok(cwd) => cwd.join(p).display().to_string(),
        Err(_) => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn split_ok(list: &[&str]) -> Split {
        split(&Schema::builtin(), &args(list)).unwrap()
    }

    fn layer_of(split: Split) -> Map<String, Value> {
        normalize(&Schema::builtin(), split.supervisor_opts)
    }

    #[test]
    fn halts_at_script_and_passes_args_through() {
        let split = split_ok(&["--clear", "script.js", "--flag", "x"]);
        assert_eq!(split.script, "script.js");
        assert_eq!(split.script_args, args(&["--flag", "x"]));
        assert!(split.runtime_args.is_empty());
        assert_eq!(layer_of(split)["clear"], json!(true));
    }

    #[test]
    fn collects_require_and_finds_script() {
        let split = split_ok(&["--debounce=50", "--require", "./a.js", "index.js"]);
        assert_eq!(split.runtime_args, args(&["--require=./a.js"]));
        assert_eq!(split.script, "index.js");
        assert!(split.script_args.is_empty());
        assert_eq!(layer_of(split)["debounce"], json!(50));
    }

    #[test]
    fn repeated_scalar_flag_keeps_last_occurrence() {
        let split = split_ok(&["--debounce=1", "--debounce=2", "script.js"]);
        assert_eq!(layer_of(split)["debounce"], json!(2));
    }

    #[test]
    fn repeatable_flag_collects_even_a_single_occurrence() {
        let split = split_ok(&["--ignore", "build", "script.js"]);
        assert_eq!(layer_of(split)["ignore"], json!(["build"]));

        let split = split_ok(&["--ignore", "build", "--ignore=dist", "script.js"]);
        assert_eq!(layer_of(split)["ignore"], json!(["build", "dist"]));
    }

    #[test]
    fn bare_inspect_round_trips_as_bare_flag() {
        let split = split_ok(&["--inspect", "script.js"]);
        assert_eq!(split.runtime_args, args(&["--inspect"]));
        assert_eq!(split.script, "script.js");
    }

    #[test]
    fn inspect_with_explicit_value_keeps_it() {
        let split = split_ok(&["--inspect=9229", "script.js"]);
        assert_eq!(split.runtime_args, args(&["--inspect=9229"]));
        assert_eq!(split.script, "script.js");
    }

    #[test]
    fn missing_script_is_a_usage_error() {
        let err = split(&Schema::builtin(), &args(&["--clear"])).unwrap_err();
        assert!(matches!(err, Error::Usage));
        let err = split(&Schema::builtin(), &args(&[])).unwrap_err();
        assert!(matches!(err, Error::Usage));
    }

    #[test]
    fn script_args_keep_a_separator_verbatim() {
        let split = split_ok(&["script.js", "a", "--", "--not-an-option"]);
        assert_eq!(split.script, "script.js");
        assert_eq!(split.script_args, args(&["a", "--", "--not-an-option"]));
    }

    #[test]
    fn separator_before_script_is_eaten() {
        let split = split_ok(&["--clear", "--", "script.js", "x"]);
        assert_eq!(split.script, "script.js");
        assert_eq!(split.script_args, args(&["x"]));
    }

    #[test]
    fn attach_tail_inserts_separator_for_existing_positionals() {
        let joined = attach_tail(args(&["app.js", "a"]), Some(args(&["b"])));
        assert_eq!(joined, args(&["app.js", "a", "--", "b"]));

        let joined = attach_tail(Vec::new(), Some(args(&["app.js"])));
        assert_eq!(joined, args(&["app.js"]));

        let joined = attach_tail(args(&["app.js"]), None);
        assert_eq!(joined, args(&["app.js"]));
    }

    #[test]
    fn require_alias_accumulates_in_order() {
        let split = split_ok(&["-r", "./a.js", "--require", "./b.js", "script.js"]);
        assert_eq!(
            split.runtime_args,
            args(&["--require=./a.js", "--require=./b.js"])
        );
        assert_eq!(split.script, "script.js");
    }

    #[test]
    fn no_prefixed_node_flags_stay_literal() {
        let split = split_ok(&["--no-warnings", "script.js"]);
        assert_eq!(split.runtime_args, args(&["--no-warnings"]));
    }

    #[test]
    fn negated_supervisor_boolean_turns_off() {
        let split = split_ok(&["--no-clear", "script.js"]);
        assert_eq!(layer_of(split)["clear"], json!(false));
    }

    #[test]
    fn boolean_accepts_inline_false() {
        let split = split_ok(&["--notify=false", "script.js"]);
        assert_eq!(layer_of(split)["notify"], json!(false));
    }

    #[test]
    fn unknown_node_flag_consumes_following_value() {
        let split = split_ok(&["--max-old-space-size", "4096", "script.js"]);
        assert_eq!(split.runtime_args, args(&["--max-old-space-size=4096"]));
        assert_eq!(split.script, "script.js");
    }

    #[test]
    fn unknown_bare_flag_directly_before_script_swallows_it() {
        // without a declaration there is no way to tell a boolean flag from
        // a value-taking one, so the script token becomes the flag's value
        let err = split(&Schema::builtin(), &args(&["--enable-thing", "script.js"])).unwrap_err();
        assert!(matches!(err, Error::Usage));

        let split = split_ok(&["--enable-thing=1", "script.js"]);
        assert_eq!(split.runtime_args, args(&["--enable-thing=1"]));
        assert_eq!(split.script, "script.js");
    }

    #[test]
    fn invalid_numeric_value_is_dropped() {
        let split = split_ok(&["--debounce=soon", "script.js"]);
        assert!(!layer_of(split).contains_key("debounce"));
    }

    #[test]
    fn stringify_orders_and_prefixes_keys() {
        let mut opts: BTreeMap<String, Vec<Arg>> = BTreeMap::new();
        opts.insert("v".to_string(), vec![Arg::Flag(true)]);
        opts.insert(
            "require".to_string(),
            vec![Arg::Text("a".to_string()), Arg::Text("b".to_string())],
        );
        opts.insert("expose_gc".to_string(), vec![Arg::Flag(false)]);
        assert_eq!(
            stringify(&opts),
            args(&["--require=a", "--require=b", "-v"])
        );
    }

    #[test]
    fn parse_merges_cli_options_over_file_layers() {
        let schema = Schema::builtin();
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("script.js");
        std::fs::write(&script, "").unwrap();
        std::fs::write(
            dir.path().join(config::CONFIG_FILE),
            r#"{ "debounce": 99, "clear": true }"#,
        )
        .unwrap();

        let argv = args(&["--debounce=5", &script.display().to_string()]);
        let cmd = parse(&schema, &argv).unwrap();
        assert_eq!(cmd.opts.debounce, 5);
        assert!(cmd.opts.clear);
        assert_eq!(cmd.script, script.display().to_string());
    }

    #[test]
    fn parse_resolves_ignore_entries_to_absolute_paths() {
        let schema = Schema::builtin();
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("script.js");
        std::fs::write(&script, "").unwrap();

        let argv = args(&["--ignore", "stuff", &script.display().to_string()]);
        let cmd = parse(&schema, &argv).unwrap();
        let last = cmd.opts.ignore.last().unwrap();
        assert!(Path::new(last).is_absolute());
        assert!(last.ends_with("stuff"));
    }
}
