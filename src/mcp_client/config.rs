//! Server definition loading.
//!
//! Reads an `mcpServers` map from JSON or YAML (chosen by file extension)
//! into immutable [`ServerDescriptor`]s. String values may reference the
//! environment as `${VAR}` or `${VAR:-default}`.
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "fetch": {
//!       "description": "Fetch web pages",
//!       "transport": "container",
//!       "image": "mcp/fetch",
//!       "env": { "USER_AGENT": "${USER_AGENT:-mcp-chat}" }
//!     },
//!     "calc": { "command": "python3", "args": ["calc_server.py"] }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::errors::McpError;
use super::types::{MountSpec, ServerDescriptor, TransportKind};

/// Environment variable naming the server definition file.
pub const CONFIG_ENV_VAR: &str = "MCP_CHAT_CONFIG";

/// Location searched for, relative to the working directory and its parents.
const DEFAULT_CONFIG_RELATIVE: &str = "conf/mcp-servers.json";

/// Container runtime used when an entry does not name one.
const DEFAULT_RUNTIME: &str = "docker";

// ─── File Format ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ServersFile {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: BTreeMap<String, ServerEntry>,
}

/// One entry of the `mcpServers` map as written on disk.
#[derive(Debug, Deserialize)]
struct ServerEntry {
    #[serde(default)]
    description: String,
    #[serde(default)]
    transport: Option<TransportField>,
    #[serde(default)]
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    runtime: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default, alias = "mounted_directories")]
    mounts: Vec<MountSpec>,
    #[serde(default)]
    cwd: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TransportField {
    #[serde(alias = "stdio")]
    Script,
    Container,
}

/// Serialization format of a server definition file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    /// `.yaml` / `.yml` are YAML, everything else is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Json,
        }
    }
}

// ─── ServerConfigs ───────────────────────────────────────────────────────────

/// All server descriptors from one definition file, keyed by name.
#[derive(Debug, Clone)]
pub struct ServerConfigs {
    path: PathBuf,
    servers: BTreeMap<String, ServerDescriptor>,
}

impl ServerConfigs {
    /// Load and validate a definition file, resolving `${VAR}` references
    /// against the process environment.
    pub fn load(path: &Path) -> Result<Self, McpError> {
        let raw = std::fs::read_to_string(path).map_err(|e| McpError::ConfigError {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;

        let mut configs = Self::parse(&raw, ConfigFormat::from_path(path), &|var: &str| {
            std::env::var(var).ok()
        })
        .map_err(|e| match e {
            McpError::ConfigError { reason } => McpError::ConfigError {
                reason: format!("{}: {reason}", path.display()),
            },
            other => other,
        })?;
        configs.path = path.to_path_buf();

        tracing::info!(
            path = %path.display(),
            servers = configs.servers.len(),
            "loaded server definitions"
        );
        Ok(configs)
    }

    /// Parse definition text. `env` resolves `${VAR}` references.
    pub fn parse(
        raw: &str,
        format: ConfigFormat,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, McpError> {
        let mut tree: serde_json::Value = match format {
            ConfigFormat::Json => serde_json::from_str(raw).map_err(|e| McpError::ConfigError {
                reason: format!("invalid JSON: {e}"),
            })?,
            ConfigFormat::Yaml => serde_yaml::from_str(raw).map_err(|e| McpError::ConfigError {
                reason: format!("invalid YAML: {e}"),
            })?,
        };

        // Substitution happens after parsing so values cannot alter structure.
        interpolate_strings(&mut tree, env);

        let file: ServersFile = serde_json::from_value(tree).map_err(|e| McpError::ConfigError {
            reason: format!("invalid server definitions: {e}"),
        })?;

        let mut servers = BTreeMap::new();
        for (name, entry) in file.mcp_servers {
            let descriptor = entry.into_descriptor(&name)?;
            descriptor.validate()?;
            servers.insert(name, descriptor);
        }

        Ok(Self {
            path: PathBuf::new(),
            servers,
        })
    }

    /// File the definitions were loaded from (empty when parsed from text).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Server names in sorted order.
    pub fn server_names(&self) -> Vec<&str> {
        self.servers.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Look up a server, listing the available names on a miss.
    pub fn get(&self, name: &str) -> Result<&ServerDescriptor, McpError> {
        self.servers.get(name).ok_or_else(|| McpError::ConfigError {
            reason: format!(
                "server '{name}' not found. Available: {}",
                self.server_names().join(", ")
            ),
        })
    }

    /// Render the table printed by `--list-servers`.
    pub fn servers_table(&self) -> String {
        if self.is_empty() {
            return "No servers configured\n".to_string();
        }

        let rule = "=".repeat(80);
        let mut out = String::new();
        let _ = writeln!(out, "\n{rule}");
        let _ = writeln!(out, "Available MCP Servers");
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "{:<15} {:<20} {:<45}", "Name", "Image", "Description");
        let _ = writeln!(out, "{}", "-".repeat(80));

        for (name, descriptor) in &self.servers {
            let image = descriptor.image().unwrap_or("N/A");
            let description = abbreviate(&descriptor.description, 45);
            let _ = writeln!(out, "{name:<15} {image:<20} {description:<45}");
        }

        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "\nTotal servers configured: {}", self.servers.len());
        let _ = writeln!(out, "\nUsage: mcp-chat --server <name> --chat");
        let _ = writeln!(out, "       mcp-chat --server <name> --members");
        out
    }
}

impl ServerEntry {
    fn into_descriptor(self, name: &str) -> Result<ServerDescriptor, McpError> {
        let transport = self.transport.unwrap_or(if self.image.is_some() {
            TransportField::Container
        } else {
            TransportField::Script
        });

        let kind = match transport {
            TransportField::Script => {
                if self.image.is_some() {
                    tracing::warn!(server = name, "'image' is ignored for script transport");
                }
                TransportKind::Script {
                    command: self.command,
                }
            }
            TransportField::Container => {
                let image = self.image.ok_or_else(|| McpError::ConfigError {
                    reason: format!("server '{name}': container transport requires 'image'"),
                })?;
                TransportKind::Container {
                    runtime: self.runtime.unwrap_or_else(|| DEFAULT_RUNTIME.to_string()),
                    image,
                }
            }
        };

        let mounts = self
            .mounts
            .into_iter()
            .map(|m| MountSpec {
                source: expand_tilde(&m.source),
                ..m
            })
            .collect();

        Ok(ServerDescriptor {
            name: name.to_string(),
            description: self.description,
            kind,
            args: self.args,
            env: self.env,
            mounts,
            cwd: self.cwd.map(|c| PathBuf::from(expand_tilde(&c))),
        })
    }
}

// ─── Script Path Mode ────────────────────────────────────────────────────────

/// Build a descriptor from a bare server script path.
///
/// `.py` runs under `python3`, `.js`/`.mjs` under `node`, anything else is
/// executed directly.
pub fn from_script_path(path: &Path) -> Result<ServerDescriptor, McpError> {
    if !path.is_file() {
        return Err(McpError::ConfigError {
            reason: format!("server script not found: {}", path.display()),
        });
    }

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("server")
        .to_string();
    let script = path.display().to_string();

    let (command, args) = match path.extension().and_then(|e| e.to_str()) {
        Some("py") => ("python3".to_string(), vec![script]),
        Some("js") | Some("mjs") => ("node".to_string(), vec![script]),
        _ => (script, Vec::new()),
    };

    let mut descriptor = ServerDescriptor::script(&name, &command, args);
    descriptor.description = format!("Local server script {}", path.display());
    Ok(descriptor)
}

// ─── Config Discovery ────────────────────────────────────────────────────────

/// Locate the server definition file.
///
/// Order: the explicit path, then `env_path` (the value of
/// `MCP_CHAT_CONFIG`), then `conf/mcp-servers.json` in `start` or any of
/// its parents.
pub fn find_config_path(
    explicit: Option<&Path>,
    env_path: Option<String>,
    start: &Path,
) -> Result<PathBuf, McpError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Some(path) = env_path.filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(expand_tilde(&path)));
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(DEFAULT_CONFIG_RELATIVE);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(McpError::ConfigError {
        reason: format!(
            "could not find {DEFAULT_CONFIG_RELATIVE} (use --config or set {CONFIG_ENV_VAR})"
        ),
    })
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Interpolate every string value in the tree. Map keys are left alone.
fn interpolate_strings(value: &mut serde_json::Value, env: &dyn Fn(&str) -> Option<String>) {
    match value {
        serde_json::Value::String(s) if s.contains("${") => {
            *s = interpolate_env_vars(s, env);
        }
        serde_json::Value::Array(items) => {
            for item in items {
                interpolate_strings(item, env);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                interpolate_strings(item, env);
            }
        }
        _ => {}
    }
}

/// Replace `${VAR}` and `${VAR:-default}` using `env`.
fn interpolate_env_vars(input: &str, env: &dyn Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr, env));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str, env: &dyn Fn(&str) -> Option<String>) -> String {
    match expr.split_once(":-") {
        Some((var, default)) => env(var).unwrap_or_else(|| default.to_string()),
        None => env(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

fn abbreviate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    const SAMPLE: &str = r#"{
        "mcpServers": {
            "fetch": {
                "description": "Fetch web pages",
                "transport": "container",
                "image": "mcp/fetch",
                "env": {"TOKEN": "${FETCH_TOKEN:-anon}"}
            },
            "filesystem": {
                "image": "mcp/filesystem",
                "runtime": "podman",
                "args": ["/projects"],
                "mounted_directories": [
                    {"source": "/srv/data", "target": "/projects/data", "read_only": true}
                ]
            },
            "calc": {"command": "python3", "args": ["calc.py"], "transport": "stdio"}
        }
    }"#;

    #[test]
    fn test_parse_json() {
        let configs = ServerConfigs::parse(SAMPLE, ConfigFormat::Json, &no_env).unwrap();
        assert_eq!(configs.server_names(), vec!["calc", "fetch", "filesystem"]);

        let fetch = configs.get("fetch").unwrap();
        assert_eq!(
            fetch.kind,
            TransportKind::Container {
                runtime: "docker".into(),
                image: "mcp/fetch".into()
            }
        );
        assert_eq!(fetch.env["TOKEN"], "anon");

        let fs = configs.get("filesystem").unwrap();
        assert!(fs.is_container());
        assert_eq!(fs.mounts[0].to_volume_arg(), "/srv/data:/projects/data:ro");
        assert!(matches!(&fs.kind, TransportKind::Container { runtime, .. } if runtime == "podman"));

        let calc = configs.get("calc").unwrap();
        assert_eq!(
            calc.kind,
            TransportKind::Script {
                command: "python3".into()
            }
        );
    }

    #[test]
    fn test_env_interpolation_uses_lookup() {
        let env = |var: &str| (var == "FETCH_TOKEN").then(|| "s3cret".to_string());
        let configs = ServerConfigs::parse(SAMPLE, ConfigFormat::Json, &env).unwrap();
        assert_eq!(configs.get("fetch").unwrap().env["TOKEN"], "s3cret");
    }

    #[test]
    fn test_interpolated_values_keep_quotes_and_backslashes() {
        let raw = r#"{"mcpServers": {"x": {"command": "run", "env": {"T": "${TOK}", "P": "${WINPATH}"}}}}"#;
        let env = |var: &str| match var {
            "TOK" => Some(r#"ab"cd"#.to_string()),
            "WINPATH" => Some(r"C:\new".to_string()),
            _ => None,
        };
        let configs = ServerConfigs::parse(raw, ConfigFormat::Json, &env).unwrap();
        let x = configs.get("x").unwrap();
        assert_eq!(x.env["T"], r#"ab"cd"#);
        assert_eq!(x.env["P"], r"C:\new");
    }

    #[test]
    fn test_yaml_interpolation_cannot_inject_structure() {
        let yaml = "mcpServers:\n  x:\n    command: run\n    description: ${DESC}\n";
        let env = |var: &str| (var == "DESC").then(|| "a\n    image: evil".to_string());
        let configs = ServerConfigs::parse(yaml, ConfigFormat::Yaml, &env).unwrap();
        let x = configs.get("x").unwrap();
        assert!(!x.is_container());
        assert_eq!(x.description, "a\n    image: evil");
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
mcpServers:
  time:
    description: Current time
    command: uvx
    args: [mcp-server-time]
"#;
        let configs = ServerConfigs::parse(yaml, ConfigFormat::Yaml, &no_env).unwrap();
        let time = configs.get("time").unwrap();
        assert_eq!(time.args, vec!["mcp-server-time"]);
        assert!(!time.is_container());
    }

    #[test]
    fn test_unknown_server_lists_available() {
        let configs = ServerConfigs::parse(SAMPLE, ConfigFormat::Json, &no_env).unwrap();
        let err = configs.get("nope").unwrap_err();
        assert_eq!(
            err.to_string(),
            "config error: server 'nope' not found. Available: calc, fetch, filesystem"
        );
    }

    #[test]
    fn test_container_without_image_is_rejected() {
        let raw = r#"{"mcpServers": {"x": {"transport": "container"}}}"#;
        let err = ServerConfigs::parse(raw, ConfigFormat::Json, &no_env).unwrap_err();
        assert!(err.to_string().contains("requires 'image'"));
    }

    #[test]
    fn test_script_without_command_is_rejected() {
        let raw = r#"{"mcpServers": {"x": {"description": "nothing to run"}}}"#;
        assert!(ServerConfigs::parse(raw, ConfigFormat::Json, &no_env).is_err());
    }

    #[test]
    fn test_invalid_json() {
        let err = ServerConfigs::parse("{not json", ConfigFormat::Json, &no_env).unwrap_err();
        assert!(err.to_string().contains("invalid JSON"));
    }

    #[test]
    fn test_load_from_file_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.yml");
        std::fs::write(&path, "mcpServers:\n  echo:\n    command: cat\n").unwrap();

        let configs = ServerConfigs::load(&path).unwrap();
        assert_eq!(configs.path(), path.as_path());
        assert_eq!(configs.len(), 1);
    }

    #[test]
    fn test_servers_table() {
        let configs = ServerConfigs::parse(SAMPLE, ConfigFormat::Json, &no_env).unwrap();
        let table = configs.servers_table();
        assert!(table.contains("Available MCP Servers"));
        assert!(table.contains("mcp/fetch"));
        assert!(table.contains("N/A"));
        assert!(table.contains("Total servers configured: 3"));
    }

    #[test]
    fn test_servers_table_when_empty() {
        let configs = ServerConfigs::parse(r#"{"mcpServers": {}}"#, ConfigFormat::Json, &no_env).unwrap();
        assert!(configs.is_empty());
        assert_eq!(configs.servers_table(), "No servers configured\n");
    }

    #[test]
    fn test_from_script_path() {
        let dir = tempfile::tempdir().unwrap();

        let py = dir.path().join("weather.py");
        std::fs::write(&py, "print('hi')").unwrap();
        let d = from_script_path(&py).unwrap();
        assert_eq!(d.name, "weather");
        assert_eq!(
            d.kind,
            TransportKind::Script {
                command: "python3".into()
            }
        );
        assert_eq!(d.args, vec![py.display().to_string()]);

        let js = dir.path().join("server.mjs");
        std::fs::write(&js, "").unwrap();
        assert!(matches!(
            from_script_path(&js).unwrap().kind,
            TransportKind::Script { ref command } if command == "node"
        ));

        let bin = dir.path().join("server-bin");
        std::fs::write(&bin, "").unwrap();
        let d = from_script_path(&bin).unwrap();
        assert!(d.args.is_empty());

        assert!(from_script_path(&dir.path().join("missing.py")).is_err());
    }

    #[test]
    fn test_find_config_path_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(dir.path().join("conf")).unwrap();
        std::fs::write(dir.path().join(DEFAULT_CONFIG_RELATIVE), "{}").unwrap();

        let explicit = PathBuf::from("/tmp/explicit.json");
        assert_eq!(
            find_config_path(Some(&explicit), Some("/tmp/env.json".into()), &nested).unwrap(),
            explicit
        );
        assert_eq!(
            find_config_path(None, Some("/tmp/env.json".into()), &nested).unwrap(),
            PathBuf::from("/tmp/env.json")
        );
        assert_eq!(
            find_config_path(None, None, &nested).unwrap(),
            dir.path().join(DEFAULT_CONFIG_RELATIVE)
        );
    }

    #[test]
    fn test_interpolate_env_vars() {
        let env = |var: &str| (var == "HOST").then(|| "example.org".to_string());
        assert_eq!(interpolate_env_vars("http://${HOST}/x", &env), "http://example.org/x");
        assert_eq!(interpolate_env_vars("${PORT:-8080}", &env), "8080");
        assert_eq!(interpolate_env_vars("${MISSING}", &env), "");
        assert_eq!(interpolate_env_vars("no vars here", &env), "no vars here");
    }
}
