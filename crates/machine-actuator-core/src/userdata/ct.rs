//! `ct` postprocessor: Container Linux Config to Ignition
//!
//! Parses a Container Linux Config YAML document and converts it to an
//! Ignition 2.2 JSON document. Only the sections machines actually boot with
//! are understood:
//!
//! - `storage.files` and `storage.directories`
//! - `systemd.units` (with drop-ins)
//! - `networkd.units`
//! - `passwd.users`
//!
//! Unknown keys are ignored. Structural problems are collected into a
//! [`Report`]; any error entry fails the transform with every problem listed.

use crate::error::{Error, Result};
use crate::registry::Postprocessor;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Ignition spec version produced by the transform
pub const IGNITION_VERSION: &str = "2.2.0";

const DEFAULT_FILESYSTEM: &str = "root";
const MAX_MODE: u32 = 0o7777;

const SYSTEMD_UNIT_SUFFIXES: &[&str] = &[
    "service", "socket", "device", "mount", "automount", "swap", "target", "path", "timer",
    "snapshot", "slice", "scope",
];
const NETWORKD_UNIT_SUFFIXES: &[&str] = &["link", "netdev", "network"];

/// The `ct` transform
#[derive(Debug, Default, Clone, Copy)]
pub struct CtPostprocessor;

impl Postprocessor for CtPostprocessor {
    fn name(&self) -> &'static str {
        "ct"
    }

    fn process(&self, rendered: &str) -> Result<String> {
        let (ignition, report) = transpile(rendered)?;

        for entry in report.entries.iter().filter(|e| e.level == Level::Warning) {
            warn!("ct: {}", entry);
        }
        if report.has_errors() {
            return Err(Error::postprocessor(report.to_string()));
        }

        Ok(serde_json::to_string(&ignition)?)
    }
}

/// Parse and convert a Container Linux Config
///
/// YAML syntax errors fail immediately; everything else is reported.
pub fn transpile(source: &str) -> Result<(Ignition, Report)> {
    let config: ContainerLinuxConfig = if source.trim().is_empty() {
        ContainerLinuxConfig::default()
    } else {
        serde_yaml::from_str(source)
            .map_err(|e| Error::postprocessor(format!("error parsing config: {}", e)))?
    };

    let mut report = Report::default();
    let ignition = convert(&config, &mut report);
    Ok((ignition, report))
}

/// Severity of a report entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Error,
    Warning,
}

/// One problem found while converting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub level: Level,
    /// Dotted location in the source document, e.g. `storage.files.0.path`
    pub context: String,
    pub message: String,
}

impl fmt::Display for ReportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            Level::Error => "error",
            Level::Warning => "warning",
        };
        write!(f, "{} at {}: {}", level, self.context, self.message)
    }
}

/// Problems collected during a conversion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub entries: Vec<ReportEntry>,
}

impl Report {
    fn error(&mut self, context: impl Into<String>, message: impl Into<String>) {
        self.entries.push(ReportEntry {
            level: Level::Error,
            context: context.into(),
            message: message.into(),
        });
    }

    fn warning(&mut self, context: impl Into<String>, message: impl Into<String>) {
        self.entries.push(ReportEntry {
            level: Level::Warning,
            context: context.into(),
            message: message.into(),
        });
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|e| e.level == Level::Error)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self.entries.iter().map(ToString::to_string).collect();
        write!(f, "{}", lines.join("\n"))
    }
}

// Container Linux Config input

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContainerLinuxConfig {
    storage: Storage,
    systemd: Systemd,
    networkd: Networkd,
    passwd: Passwd,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Storage {
    files: Vec<File>,
    directories: Vec<Directory>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct File {
    filesystem: Option<String>,
    path: String,
    contents: FileContents,
    mode: Option<Mode>,
    user: Option<NodeUser>,
    group: Option<NodeUser>,
    append: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileContents {
    inline: Option<String>,
    remote: Option<Remote>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Remote {
    url: String,
    verification: Option<Verification>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Verification {
    hash: Option<Hash>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Hash {
    function: String,
    sum: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Directory {
    filesystem: Option<String>,
    path: String,
    mode: Option<Mode>,
    user: Option<NodeUser>,
    group: Option<NodeUser>,
}

/// File mode, either a YAML integer or an octal string such as `0644`
///
/// YAML 1.2 reads a leading-zero literal as a string, so both forms occur.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Mode {
    Int(u32),
    Text(String),
}

impl Mode {
    fn resolve(&self) -> std::result::Result<u32, String> {
        let mode = match self {
            Mode::Int(mode) => *mode,
            Mode::Text(text) => {
                let digits = text.trim();
                let digits = digits.strip_prefix("0o").unwrap_or(digits);
                u32::from_str_radix(digits, 8)
                    .map_err(|_| format!("invalid file mode {:?}", text))?
            }
        };
        if mode > MAX_MODE {
            return Err(format!("file mode {:o} is out of range", mode));
        }
        Ok(mode)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NodeUser {
    id: Option<i64>,
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Systemd {
    units: Vec<SystemdUnit>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SystemdUnit {
    name: String,
    enabled: Option<bool>,
    /// Deprecated spelling of `enabled`
    enable: bool,
    mask: bool,
    contents: Option<String>,
    dropins: Vec<Dropin>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Dropin {
    name: String,
    contents: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Networkd {
    units: Vec<NetworkdUnit>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NetworkdUnit {
    name: String,
    contents: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Passwd {
    users: Vec<User>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct User {
    name: String,
    password_hash: Option<String>,
    ssh_authorized_keys: Vec<String>,
    uid: Option<i64>,
    gecos: Option<String>,
    home_dir: Option<String>,
    no_create_home: bool,
    primary_group: Option<String>,
    groups: Vec<String>,
    shell: Option<String>,
}

// Ignition output

/// Ignition document
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Ignition {
    pub ignition: IgnitionMeta,
    pub networkd: IgnitionNetworkd,
    pub passwd: IgnitionPasswd,
    pub storage: IgnitionStorage,
    pub systemd: IgnitionSystemd,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IgnitionMeta {
    pub config: serde_json::Map<String, serde_json::Value>,
    pub security: IgnitionSecurity,
    pub timeouts: serde_json::Map<String, serde_json::Value>,
    pub version: String,
}

impl Default for IgnitionMeta {
    fn default() -> Self {
        Self {
            config: Default::default(),
            security: Default::default(),
            timeouts: Default::default(),
            version: IGNITION_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IgnitionSecurity {
    pub tls: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IgnitionStorage {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub directories: Vec<IgnitionDirectory>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<IgnitionFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IgnitionFile {
    pub filesystem: String,
    pub path: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub append: bool,
    pub contents: IgnitionContents,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<IgnitionNodeUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<IgnitionNodeUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IgnitionContents {
    pub source: String,
    pub verification: IgnitionVerification,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IgnitionVerification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IgnitionDirectory {
    pub filesystem: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<IgnitionNodeUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<IgnitionNodeUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IgnitionNodeUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IgnitionSystemd {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<IgnitionSystemdUnit>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IgnitionSystemdUnit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dropins: Vec<IgnitionDropin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub mask: bool,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IgnitionDropin {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IgnitionNetworkd {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<IgnitionNetworkdUnit>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IgnitionNetworkdUnit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IgnitionPasswd {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<IgnitionUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IgnitionUser {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ssh_authorized_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gecos: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_dir: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub no_create_home: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_group: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
}

// Conversion

fn convert(config: &ContainerLinuxConfig, report: &mut Report) -> Ignition {
    let mut ignition = Ignition::default();

    for (i, file) in config.storage.files.iter().enumerate() {
        let context = format!("storage.files.{}", i);
        if let Some(file) = convert_file(file, &context, report) {
            ignition.storage.files.push(file);
        }
    }

    for (i, dir) in config.storage.directories.iter().enumerate() {
        let context = format!("storage.directories.{}", i);
        check_absolute(&dir.path, &context, report);
        ignition.storage.directories.push(IgnitionDirectory {
            filesystem: filesystem_or_default(dir.filesystem.as_deref()),
            path: dir.path.clone(),
            mode: resolve_mode(dir.mode.as_ref(), &context, report),
            user: dir.user.as_ref().map(convert_node_user),
            group: dir.group.as_ref().map(convert_node_user),
        });
    }

    for (i, unit) in config.systemd.units.iter().enumerate() {
        let context = format!("systemd.units.{}", i);
        check_unit_name(&unit.name, SYSTEMD_UNIT_SUFFIXES, &context, report);
        if unit.enable {
            report.warning(&context, "the enable field has been deprecated in favor of enabled");
        }

        let dropins = unit
            .dropins
            .iter()
            .enumerate()
            .map(|(j, dropin)| {
                if !dropin.name.ends_with(".conf") {
                    report.error(
                        format!("{}.dropins.{}", context, j),
                        format!("invalid drop-in name {:?}: must end in .conf", dropin.name),
                    );
                }
                IgnitionDropin {
                    contents: dropin.contents.clone(),
                    name: dropin.name.clone(),
                }
            })
            .collect();

        ignition.systemd.units.push(IgnitionSystemdUnit {
            contents: unit.contents.clone(),
            dropins,
            enabled: unit.enabled.or(unit.enable.then_some(true)),
            mask: unit.mask,
            name: unit.name.clone(),
        });
    }

    for (i, unit) in config.networkd.units.iter().enumerate() {
        let context = format!("networkd.units.{}", i);
        check_unit_name(&unit.name, NETWORKD_UNIT_SUFFIXES, &context, report);
        ignition.networkd.units.push(IgnitionNetworkdUnit {
            contents: unit.contents.clone(),
            name: unit.name.clone(),
        });
    }

    for (i, user) in config.passwd.users.iter().enumerate() {
        if user.name.is_empty() {
            report.error(format!("passwd.users.{}", i), "user name is required");
        }
        ignition.passwd.users.push(IgnitionUser {
            name: user.name.clone(),
            password_hash: user.password_hash.clone(),
            ssh_authorized_keys: user.ssh_authorized_keys.clone(),
            uid: user.uid,
            gecos: user.gecos.clone(),
            home_dir: user.home_dir.clone(),
            no_create_home: user.no_create_home,
            primary_group: user.primary_group.clone(),
            groups: user.groups.clone(),
            shell: user.shell.clone(),
        });
    }

    ignition
}

fn convert_file(file: &File, context: &str, report: &mut Report) -> Option<IgnitionFile> {
    check_absolute(&file.path, context, report);

    let (source, hash) = match (&file.contents.inline, &file.contents.remote) {
        (Some(_), Some(_)) => {
            report.error(
                format!("{}.contents", context),
                "inline and remote contents are mutually exclusive",
            );
            return None;
        }
        (Some(inline), None) => (encode_data_url(inline), None),
        (None, Some(remote)) => {
            let hash = remote
                .verification
                .as_ref()
                .and_then(|v| v.hash.as_ref())
                .map(|h| format!("{}-{}", h.function, h.sum));
            (remote.url.clone(), hash)
        }
        (None, None) => (encode_data_url(""), None),
    };

    Some(IgnitionFile {
        filesystem: filesystem_or_default(file.filesystem.as_deref()),
        path: file.path.clone(),
        append: file.append,
        contents: IgnitionContents {
            source,
            verification: IgnitionVerification { hash },
        },
        mode: resolve_mode(file.mode.as_ref(), context, report),
        user: file.user.as_ref().map(convert_node_user),
        group: file.group.as_ref().map(convert_node_user),
    })
}

fn convert_node_user(user: &NodeUser) -> IgnitionNodeUser {
    IgnitionNodeUser {
        id: user.id,
        name: user.name.clone(),
    }
}

fn filesystem_or_default(filesystem: Option<&str>) -> String {
    filesystem
        .filter(|fs| !fs.is_empty())
        .unwrap_or(DEFAULT_FILESYSTEM)
        .to_string()
}

fn resolve_mode(mode: Option<&Mode>, context: &str, report: &mut Report) -> Option<u32> {
    match mode?.resolve() {
        Ok(mode) => Some(mode),
        Err(message) => {
            report.error(format!("{}.mode", context), message);
            None
        }
    }
}

fn check_absolute(path: &str, context: &str, report: &mut Report) {
    if !path.starts_with('/') {
        report.error(
            format!("{}.path", context),
            format!("path not absolute: {:?}", path),
        );
    }
}

fn check_unit_name(name: &str, suffixes: &[&str], context: &str, report: &mut Report) {
    if name.is_empty() {
        report.error(format!("{}.name", context), "unit name is required");
        return;
    }

    let valid = name
        .rsplit_once('.')
        .is_some_and(|(stem, suffix)| !stem.is_empty() && suffixes.contains(&suffix));
    if !valid {
        report.error(
            format!("{}.name", context),
            format!("invalid unit name {:?}: unknown unit type", name),
        );
    }
}

/// Encode `contents` as a `data:` URL with percent-encoded payload
fn encode_data_url(contents: &str) -> String {
    format!("data:,{}", urlencoding::encode(contents))
}
