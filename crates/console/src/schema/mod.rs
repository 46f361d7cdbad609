//! Declarative protocol schemas for proxy configuration documents.
//!
//! A [`ProtocolSchema`] is an ordered list of [`FieldSchema`] entries for
//! one protocol of one [`ConfigKind`]. The [`SchemaRegistry`] is built once
//! at process start from the builtin tables and is immutable afterwards, so
//! concurrent readers share it without locking. Adding a protocol is a
//! deployment-time change.

mod builtin;

use std::collections::HashMap;

use proxyfleet_common::proto::ConfigKind;
use serde_json::Value;

use crate::document::{self, FieldPath};

/// Declared value kind of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum FieldKind {
    /// Free-form text.
    Text,
    /// Integer, optionally range-bounded.
    Integer,
    /// Single choice from `options`.
    Select,
    /// Multiple choices from `options`.
    MultiSelect,
    /// Boolean toggle.
    Switch,
    /// Multi-line text block.
    Textarea,
}

/// Value generator attached to a field (operator convenience).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Generator {
    /// Random v4 UUID.
    Uuid,
    /// Random password.
    Password,
}

impl Generator {
    /// Produces a fresh value.
    pub fn generate(&self) -> Value {
        match self {
            Generator::Uuid => Value::String(uuid::Uuid::new_v4().to_string()),
            Generator::Password => Value::String(generate_password(16)),
        }
    }
}

/// Random password over the charset the original panel used for
/// Shadowsocks/Trojan secrets.
pub fn generate_password(length: usize) -> String {
    use rand::Rng;
    const CHARSET: &[u8] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*";
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Named validation rule attached to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Rule {
    /// TCP/UDP port, 1–65535.
    Port,
    /// Hyphenated v4-style UUID.
    Uuid,
    /// IPv4 address.
    Ipv4,
    /// IPv6 address.
    Ipv6,
    /// IPv4 or IPv6 address.
    Ip,
    /// Domain name, wildcard prefix allowed.
    Domain,
    /// Filesystem/URL path starting with `/`.
    AbsolutePath,
    /// Base64-encoded string.
    Base64,
    /// Minimum-length secret.
    Password,
    /// Strictly positive integer.
    PositiveInteger,
}

/// Visibility condition evaluated against the current document state.
///
/// References to absent paths evaluate as not-equal: an `Equals` condition
/// on an unset field keeps the dependent field hidden instead of erroring,
/// which schemas rely on when chaining visibility to a discriminant.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Visible when the value at the path equals the literal.
    Equals(FieldPath, Value),
    /// Visible when the value at the path differs from the literal.
    NotEquals(FieldPath, Value),
    /// Visible when the value at the path is boolean `true`.
    Truthy(FieldPath),
}

impl Condition {
    /// Visibility test for `path == literal`.
    pub fn equals(path: &str, literal: impl Into<Value>) -> Self {
        Condition::Equals(parse_builtin_path(path), literal.into())
    }

    /// Visibility test for `path != literal`.
    pub fn not_equals(path: &str, literal: impl Into<Value>) -> Self {
        Condition::NotEquals(parse_builtin_path(path), literal.into())
    }

    /// Visibility test for a boolean `true` at `path`.
    pub fn truthy(path: &str) -> Self {
        Condition::Truthy(parse_builtin_path(path))
    }

    /// Evaluates the condition against the document.
    pub fn evaluate(&self, document: &Value) -> bool {
        match self {
            Condition::Equals(path, literal) => document::get(document, path) == Some(literal),
            Condition::NotEquals(path, literal) => document::get(document, path) != Some(literal),
            Condition::Truthy(path) => {
                matches!(document::get(document, path), Some(Value::Bool(true)))
            }
        }
    }
}

/// One field of a protocol schema.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    /// Dot/index path of the field inside the document.
    pub path: FieldPath,
    /// Operator-facing label.
    pub label: &'static str,
    /// Declared value kind.
    pub kind: FieldKind,
    /// Whether a visible instance of the field must be non-empty.
    pub required: bool,
    /// Default value used when materializing a document.
    pub default: Option<Value>,
    /// Allowed values for select/multi-select fields.
    pub options: Vec<&'static str>,
    /// Inclusive integer bounds.
    pub min: Option<i64>,
    /// Inclusive integer bounds.
    pub max: Option<i64>,
    /// Optional value generator.
    pub generator: Option<Generator>,
    /// Optional named validation rule.
    pub rule: Option<Rule>,
    /// Optional visibility condition; absent means always visible.
    pub condition: Option<Condition>,
}

impl FieldSchema {
    fn new(path: &str, label: &'static str, kind: FieldKind) -> Self {
        Self {
            path: parse_builtin_path(path),
            label,
            kind,
            required: false,
            default: None,
            options: Vec::new(),
            min: None,
            max: None,
            generator: None,
            rule: None,
            condition: None,
        }
    }

    /// Free-form text field.
    pub fn text(path: &str, label: &'static str) -> Self {
        Self::new(path, label, FieldKind::Text)
    }

    /// Integer field.
    pub fn integer(path: &str, label: &'static str) -> Self {
        Self::new(path, label, FieldKind::Integer)
    }

    /// Single-select field with its allowed values.
    pub fn select(path: &str, label: &'static str, options: &[&'static str]) -> Self {
        let mut field = Self::new(path, label, FieldKind::Select);
        field.options = options.to_vec();
        field
    }

    /// Multi-select field with its allowed values.
    pub fn multi_select(path: &str, label: &'static str, options: &[&'static str]) -> Self {
        let mut field = Self::new(path, label, FieldKind::MultiSelect);
        field.options = options.to_vec();
        field
    }

    /// Boolean toggle field.
    pub fn switch(path: &str, label: &'static str) -> Self {
        Self::new(path, label, FieldKind::Switch)
    }

    /// Multi-line text field.
    pub fn textarea(path: &str, label: &'static str) -> Self {
        Self::new(path, label, FieldKind::Textarea)
    }

    /// Marks the field required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Sets the default value.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Sets inclusive integer bounds.
    pub fn range(mut self, min: i64, max: i64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Attaches a value generator.
    pub fn generator(mut self, generator: Generator) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Attaches a named validation rule.
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rule = Some(rule);
        self
    }

    /// Attaches a visibility condition.
    pub fn visible_when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Ordered field definitions for one protocol of one kind.
#[derive(Debug, Clone)]
pub struct ProtocolSchema {
    /// Kind of document the schema describes.
    pub kind: ConfigKind,
    /// Protocol discriminant value.
    pub protocol: &'static str,
    /// Fields in declaration (and validation) order.
    pub fields: Vec<FieldSchema>,
}

/// Schema lookup failure.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    /// No schema is registered for the kind/protocol pair.
    #[error("unknown protocol {protocol:?} for kind {kind}", kind = .kind.as_str())]
    UnknownProtocol {
        /// Requested kind.
        kind: ConfigKind,
        /// Requested protocol discriminant.
        protocol: String,
    },
}

/// Immutable registry of protocol schemas, keyed by kind + protocol.
#[derive(Debug)]
pub struct SchemaRegistry {
    schemas: HashMap<(ConfigKind, &'static str), ProtocolSchema>,
}

impl SchemaRegistry {
    /// Builds the registry with all builtin protocol schemas.
    pub fn builtin() -> Self {
        let mut schemas = HashMap::new();
        for schema in builtin::all() {
            schemas.insert((schema.kind, schema.protocol), schema);
        }
        Self { schemas }
    }

    /// Looks up the schema for a kind/protocol pair.
    pub fn get(&self, kind: ConfigKind, protocol: &str) -> Result<&ProtocolSchema, SchemaError> {
        self.schemas
            .iter()
            .find_map(|((k, p), schema)| (*k == kind && *p == protocol).then_some(schema))
            .ok_or_else(|| SchemaError::UnknownProtocol {
                kind,
                protocol: protocol.to_string(),
            })
    }

    /// Protocols registered for a kind, sorted for stable listings.
    pub fn protocols(&self, kind: ConfigKind) -> Vec<&'static str> {
        let mut protocols: Vec<_> = self
            .schemas
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, p)| *p)
            .collect();
        protocols.sort_unstable();
        protocols
    }

    /// Materializes the default document for a protocol, running any value
    /// generators (fresh UUIDs/passwords per call).
    pub fn default_document(
        &self,
        kind: ConfigKind,
        protocol: &str,
    ) -> Result<Value, SchemaError> {
        // Validate the pair first so unknown protocols fail the same way
        // lookups do.
        self.get(kind, protocol)?;
        Ok(builtin::default_document(kind, protocol))
    }

    /// Extracts the protocol discriminant from a document of the given
    /// kind. Inbounds and outbounds carry `protocol`; routing rules carry
    /// `type` (defaulting to `field`); balancers have a single schema.
    pub fn discriminant(kind: ConfigKind, document: &Value) -> &str {
        match kind {
            ConfigKind::Inbound | ConfigKind::Outbound => document
                .get("protocol")
                .and_then(Value::as_str)
                .unwrap_or(""),
            ConfigKind::Routing => document
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("field"),
            ConfigKind::Balancer => "balancer",
        }
    }
}

// Builtin paths are compile-time literals; a parse failure is a programming
// error caught by the registry construction test below.
fn parse_builtin_path(path: &str) -> FieldPath {
    FieldPath::parse(path).expect("builtin schema path must parse")
}
