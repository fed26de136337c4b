//! Normalized record model.
//!
//! Every resource kind has a payload struct implementing [`ResourceObject`].
//! The trait is the per-kind strategy the collectors and the diff engine
//! share: identity keys, dedup key, content fingerprint and filterable fields.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Resource kind a record or change belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultType {
    File,
    Port,
    Registry,
    Certificate,
    Service,
    User,
}

impl ResultType {
    pub const ALL: [ResultType; 6] = [
        ResultType::File,
        ResultType::Port,
        ResultType::Registry,
        ResultType::Certificate,
        ResultType::Service,
        ResultType::User,
    ];

    /// Integer code persisted in the `compared.data_type` column.
    pub const fn code(self) -> i64 {
        match self {
            ResultType::File => 1,
            ResultType::Port => 2,
            ResultType::Registry => 3,
            ResultType::Certificate => 4,
            ResultType::Service => 5,
            ResultType::User => 6,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.code() == code)
    }

    pub const fn table_name(self) -> &'static str {
        match self {
            ResultType::File => "file_system",
            ResultType::Port => "network_ports",
            ResultType::Registry => "registry",
            ResultType::Certificate => "certificates",
            ResultType::Service => "win_system_service",
            ResultType::User => "user_account",
        }
    }

    /// Flag column in the `runs` table recording whether the kind was collected.
    pub const fn run_column(self) -> &'static str {
        match self {
            ResultType::File => "file_system",
            ResultType::Port => "ports",
            ResultType::Registry => "registry",
            ResultType::Certificate => "certificates",
            ResultType::Service => "services",
            ResultType::User => "users",
        }
    }

    /// Name used for this kind inside filter documents.
    pub const fn filter_name(self) -> &'static str {
        match self {
            ResultType::File => "File",
            ResultType::Port => "Port",
            ResultType::Registry => "Registry",
            ResultType::Certificate => "Certificate",
            ResultType::Service => "Service",
            ResultType::User => "User",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ResultType::File => "FILE",
            ResultType::Port => "PORT",
            ResultType::Registry => "REGISTRY",
            ResultType::Certificate => "CERTIFICATE",
            ResultType::Service => "SERVICE",
            ResultType::User => "USER",
        }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Created,
    Deleted,
    Modified,
    Renamed,
}

impl ChangeType {
    pub const fn code(self) -> i64 {
        match self {
            ChangeType::Created => 1,
            ChangeType::Deleted => 2,
            ChangeType::Modified => 3,
            ChangeType::Renamed => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ChangeType::Created),
            2 => Some(ChangeType::Deleted),
            3 => Some(ChangeType::Modified),
            4 => Some(ChangeType::Renamed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    Collect,
    Monitor,
}

impl RunType {
    pub const fn as_str(self) -> &'static str {
        match self {
            RunType::Collect => "collect",
            RunType::Monitor => "monitor",
        }
    }
}

impl FromStr for RunType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collect" => Ok(RunType::Collect),
            "monitor" => Ok(RunType::Monitor),
            other => Err(format!("unknown run type: {other}")),
        }
    }
}

/// Per-kind strategy: how a payload is identified, fingerprinted and filtered.
pub trait ResourceObject: Serialize + DeserializeOwned + Clone + fmt::Debug + Into<Record> {
    const KIND: ResultType;

    /// Identity keys in rank order, one slot per rank. Two records sharing a
    /// key at the same rank are the same resource; lower ranks win when
    /// pairing is ambiguous. `None` marks a key unusable for this record.
    fn identity_keys(&self) -> Vec<Option<String>>;

    /// `(field, value)` pairs the filter engine is consulted with.
    fn filter_fields(&self) -> Vec<(&'static str, String)>;

    fn dedup_key(&self) -> String {
        self.identity_keys()
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect::<Vec<_>>()
            .join("\u{1f}")
    }

    /// Content fingerprint: BLAKE3 of the canonical JSON serialization.
    fn row_key(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }

    fn from_record(record: Record) -> Option<Self>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileSystemObject {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default)]
    pub is_directory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl ResourceObject for FileSystemObject {
    const KIND: ResultType = ResultType::File;

    fn identity_keys(&self) -> Vec<Option<String>> {
        vec![Some(self.path.clone())]
    }

    fn filter_fields(&self) -> Vec<(&'static str, String)> {
        vec![("Path", self.path.clone())]
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::File(obj) => Some(obj),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OpenPortObject {
    pub family: String,
    pub address: String,
    #[serde(rename = "Type")]
    pub transport: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,
}

impl ResourceObject for OpenPortObject {
    const KIND: ResultType = ResultType::Port;

    fn identity_keys(&self) -> Vec<Option<String>> {
        vec![Some(format!(
            "{}|{}|{}|{}|{}",
            self.family,
            self.address,
            self.transport,
            self.port,
            self.process_name.as_deref().unwrap_or("")
        ))]
    }

    fn filter_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("Address", self.address.clone()),
            ("Port", self.port.to_string()),
            ("Type", self.transport.clone()),
        ];
        if let Some(p) = &self.process_name {
            fields.push(("ProcessName", p.clone()));
        }
        fields
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Port(obj) => Some(obj),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserAccountObject {
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub gid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(default)]
    pub account_type: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl ResourceObject for UserAccountObject {
    const KIND: ResultType = ResultType::User;

    // Name ranks above uid; an empty value never matches.
    fn identity_keys(&self) -> Vec<Option<String>> {
        let non_empty = |s: &String| (!s.is_empty()).then(|| s.clone());
        vec![non_empty(&self.name), non_empty(&self.uid)]
    }

    fn filter_fields(&self) -> Vec<(&'static str, String)> {
        vec![("Name", self.name.clone()), ("Uid", self.uid.clone())]
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::User(obj) => Some(obj),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceObject {
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ResourceObject for ServiceObject {
    const KIND: ResultType = ResultType::Service;

    fn identity_keys(&self) -> Vec<Option<String>> {
        vec![Some(self.service_name.clone())]
    }

    fn filter_fields(&self) -> Vec<(&'static str, String)> {
        vec![("ServiceName", self.service_name.clone())]
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Service(obj) => Some(obj),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegistryObject {
    pub key: String,
    /// Value name to `TYPE:data`.
    #[serde(default)]
    pub values: BTreeMap<String, String>,
    #[serde(default)]
    pub subkeys: Vec<String>,
}

impl ResourceObject for RegistryObject {
    const KIND: ResultType = ResultType::Registry;

    fn identity_keys(&self) -> Vec<Option<String>> {
        vec![Some(self.key.clone())]
    }

    fn filter_fields(&self) -> Vec<(&'static str, String)> {
        vec![("Key", self.key.clone())]
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Registry(obj) => Some(obj),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedactionReason {
    HasPrivateKey,
}

/// Outcome of exporting a certificate's public material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Status")]
pub enum CertificateExport {
    Exported {
        #[serde(rename = "Pem")]
        pem: String,
    },
    Redacted {
        #[serde(rename = "Reason")]
        reason: RedactionReason,
    },
    Failed {
        #[serde(rename = "Reason")]
        reason: String,
    },
}

impl CertificateExport {
    pub fn column_value(&self) -> String {
        match self {
            CertificateExport::Exported { pem } => pem.clone(),
            CertificateExport::Redacted { .. } => "redacted".to_string(),
            CertificateExport::Failed { reason } => format!("failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CertificateObject {
    pub store_location: String,
    pub store_name: String,
    pub certificate_hash: String,
    pub subject: String,
    #[serde(default)]
    pub issuer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<i64>,
    pub pkcs12: CertificateExport,
}

impl CertificateObject {
    pub fn hash_plus_store(&self) -> String {
        format!("{}{}{}", self.certificate_hash, self.store_location, self.store_name)
    }
}

impl ResourceObject for CertificateObject {
    const KIND: ResultType = ResultType::Certificate;

    fn identity_keys(&self) -> Vec<Option<String>> {
        vec![Some(self.hash_plus_store())]
    }

    fn filter_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Subject", self.subject.clone()),
            ("StoreName", self.store_name.clone()),
        ]
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Certificate(obj) => Some(obj),
            _ => None,
        }
    }
}

/// A normalized record of any kind. Serializes as the bare payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Record {
    File(FileSystemObject),
    Port(OpenPortObject),
    User(UserAccountObject),
    Service(ServiceObject),
    Registry(RegistryObject),
    Certificate(CertificateObject),
}

macro_rules! each_record {
    ($rec:expr, $obj:ident => $body:expr) => {
        match $rec {
            Record::File($obj) => $body,
            Record::Port($obj) => $body,
            Record::User($obj) => $body,
            Record::Service($obj) => $body,
            Record::Registry($obj) => $body,
            Record::Certificate($obj) => $body,
        }
    };
}

impl Record {
    pub fn kind(&self) -> ResultType {
        each_record!(self, obj => kind_of(obj))
    }

    pub fn identity_keys(&self) -> Vec<Option<String>> {
        each_record!(self, obj => obj.identity_keys())
    }

    pub fn dedup_key(&self) -> String {
        each_record!(self, obj => obj.dedup_key())
    }

    pub fn row_key(&self) -> String {
        each_record!(self, obj => obj.row_key())
    }

    pub fn filter_fields(&self) -> Vec<(&'static str, String)> {
        each_record!(self, obj => obj.filter_fields())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parses a serialized payload of the given kind.
    pub fn from_json(kind: ResultType, json: &str) -> serde_json::Result<Record> {
        Ok(match kind {
            ResultType::File => Record::File(serde_json::from_str(json)?),
            ResultType::Port => Record::Port(serde_json::from_str(json)?),
            ResultType::User => Record::User(serde_json::from_str(json)?),
            ResultType::Service => Record::Service(serde_json::from_str(json)?),
            ResultType::Registry => Record::Registry(serde_json::from_str(json)?),
            ResultType::Certificate => Record::Certificate(serde_json::from_str(json)?),
        })
    }
}

fn kind_of<T: ResourceObject>(_: &T) -> ResultType {
    T::KIND
}

impl From<FileSystemObject> for Record {
    fn from(v: FileSystemObject) -> Self {
        Record::File(v)
    }
}

impl From<OpenPortObject> for Record {
    fn from(v: OpenPortObject) -> Self {
        Record::Port(v)
    }
}

impl From<UserAccountObject> for Record {
    fn from(v: UserAccountObject) -> Self {
        Record::User(v)
    }
}

impl From<ServiceObject> for Record {
    fn from(v: ServiceObject) -> Self {
        Record::Service(v)
    }
}

impl From<RegistryObject> for Record {
    fn from(v: RegistryObject) -> Self {
        Record::Registry(v)
    }
}

impl From<CertificateObject> for Record {
    fn from(v: CertificateObject) -> Self {
        Record::Certificate(v)
    }
}

/// One file system notification, normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileMonitorEvent {
    pub change_type: ChangeType,
    pub path: String,
    #[serde(default)]
    pub old_path: Option<String>,
    pub name: String,
    #[serde(default)]
    pub old_name: Option<String>,
    pub timestamp: i64,
    #[serde(default)]
    pub notify_filters: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended: Option<FileSystemObject>,
}

impl FileMonitorEvent {
    /// Row key of the `seq`th event of a monitor run.
    pub fn row_key(&self, run_id: &str, seq: i64) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(run_id.as_bytes());
        hasher.update(&seq.to_le_bytes());
        hasher.update(&serde_json::to_vec(self).unwrap_or_default());
        hasher.finalize().to_hex().to_string()
    }
}

/// One row of a comparison: a created, deleted or modified resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompareResult {
    pub base_run_id: String,
    pub compare_run_id: String,
    pub base_row_key: Option<String>,
    pub compare_row_key: Option<String>,
    pub change_type: ChangeType,
    pub result_type: ResultType,
    pub base: Option<Record>,
    pub compare: Option<Record>,
}
