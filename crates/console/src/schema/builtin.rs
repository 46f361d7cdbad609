//! Builtin protocol schemas and default-document templates.

use proxyfleet_common::proto::ConfigKind;
use serde_json::{json, Value};

use super::{Condition, FieldSchema, Generator, ProtocolSchema, Rule};

const NETWORKS_FULL: &[&str] = &["tcp", "ws", "grpc", "http"];
const NETWORKS_VMESS: &[&str] = &["tcp", "ws", "http"];
const NETWORKS_TROJAN: &[&str] = &["tcp", "ws"];
const SECURITIES: &[&str] = &["none", "tls", "reality"];
const SNIFF_OVERRIDES: &[&str] = &["http", "tls", "quic"];

const SS_CIPHERS: &[&str] = &[
    "aes-128-gcm",
    "aes-256-gcm",
    "chacha20-poly1305",
    "chacha20-ietf-poly1305",
    "2022-blake3-aes-128-gcm",
    "2022-blake3-aes-256-gcm",
    "2022-blake3-chacha20-poly1305",
];

const VMESS_CIPHERS: &[&str] = &["auto", "aes-128-gcm", "chacha20-poly1305", "none"];

const OUTBOUND_PROTOCOLS: &[&str] = &[
    "freedom",
    "vmess",
    "vless",
    "trojan",
    "shadowsocks",
    "blackhole",
];

pub(super) fn all() -> Vec<ProtocolSchema> {
    let mut schemas = vec![
        inbound("vless", vless_fields()),
        inbound("vmess", vmess_fields()),
        inbound("shadowsocks", shadowsocks_fields()),
        inbound("trojan", trojan_fields()),
        inbound("socks", socks_fields()),
        inbound("http", http_fields()),
        routing_schema(),
        balancer_schema(),
    ];
    schemas.extend(OUTBOUND_PROTOCOLS.iter().copied().map(outbound));
    schemas
}

fn inbound(protocol: &'static str, protocol_fields: Vec<FieldSchema>) -> ProtocolSchema {
    let mut fields = base_inbound_fields();
    fields.extend(protocol_fields);
    fields.extend(sniffing_fields());
    ProtocolSchema {
        kind: ConfigKind::Inbound,
        protocol,
        fields,
    }
}

fn base_inbound_fields() -> Vec<FieldSchema> {
    vec![
        FieldSchema::text("tag", "Tag").required(),
        FieldSchema::integer("port", "Listen port")
            .required()
            .range(1, 65535)
            .rule(Rule::Port)
            .default_value(443),
        FieldSchema::text("listen", "Listen address")
            .default_value("0.0.0.0")
            .rule(Rule::Ip),
    ]
}

fn sniffing_fields() -> Vec<FieldSchema> {
    vec![
        FieldSchema::switch("sniffing.enabled", "Traffic sniffing").default_value(true),
        FieldSchema::multi_select("sniffing.destOverride", "Sniffed protocols", SNIFF_OVERRIDES)
            .default_value(json!(["http", "tls"]))
            .visible_when(Condition::truthy("sniffing.enabled")),
    ]
}

fn tls_fields(network_path: &str) -> Vec<FieldSchema> {
    let security_path = "streamSettings.security";
    vec![
        FieldSchema::text("streamSettings.tlsSettings.serverName", "SNI")
            .rule(Rule::Domain)
            .visible_when(Condition::equals(security_path, "tls")),
        FieldSchema::text(
            "streamSettings.tlsSettings.certificates[0].certificateFile",
            "Certificate file",
        )
        .rule(Rule::AbsolutePath)
        .visible_when(Condition::equals(security_path, "tls")),
        FieldSchema::text(
            "streamSettings.tlsSettings.certificates[0].keyFile",
            "Key file",
        )
        .rule(Rule::AbsolutePath)
        .visible_when(Condition::equals(security_path, "tls")),
        FieldSchema::text("streamSettings.wsSettings.path", "WebSocket path")
            .rule(Rule::AbsolutePath)
            .visible_when(Condition::equals(network_path, "ws")),
    ]
}

fn vless_fields() -> Vec<FieldSchema> {
    let mut fields = vec![
        FieldSchema::text("settings.clients[0].id", "UUID")
            .required()
            .generator(Generator::Uuid)
            .rule(Rule::Uuid),
        FieldSchema::select(
            "settings.clients[0].flow",
            "Flow control",
            &["", "xtls-rprx-vision"],
        )
        .default_value("xtls-rprx-vision"),
        FieldSchema::text("settings.clients[0].email", "User email"),
        FieldSchema::select("streamSettings.network", "Transport", NETWORKS_FULL)
            .required()
            .default_value("tcp"),
        FieldSchema::select("streamSettings.security", "Transport security", SECURITIES)
            .required()
            .default_value("tls"),
    ];
    fields.extend(tls_fields("streamSettings.network"));
    fields
}

fn vmess_fields() -> Vec<FieldSchema> {
    vec![
        FieldSchema::text("settings.clients[0].id", "UUID")
            .required()
            .generator(Generator::Uuid)
            .rule(Rule::Uuid),
        FieldSchema::integer("settings.clients[0].alterId", "AlterID")
            .range(0, 65535)
            .default_value(0),
        FieldSchema::select("settings.clients[0].security", "Cipher", VMESS_CIPHERS)
            .default_value("auto"),
        FieldSchema::text("settings.clients[0].email", "User email"),
        FieldSchema::select("streamSettings.network", "Transport", NETWORKS_VMESS)
            .default_value("tcp"),
        FieldSchema::text("streamSettings.wsSettings.path", "WebSocket path")
            .rule(Rule::AbsolutePath)
            .visible_when(Condition::equals("streamSettings.network", "ws")),
    ]
}

fn shadowsocks_fields() -> Vec<FieldSchema> {
    vec![
        FieldSchema::select("settings.method", "Cipher", SS_CIPHERS)
            .required()
            .default_value("aes-256-gcm"),
        FieldSchema::text("settings.password", "Password")
            .required()
            .generator(Generator::Password)
            .rule(Rule::Password),
        FieldSchema::select("settings.network", "Network", &["tcp", "udp", "tcp,udp"])
            .default_value("tcp,udp"),
    ]
}

fn trojan_fields() -> Vec<FieldSchema> {
    vec![
        FieldSchema::text("settings.clients[0].password", "Password")
            .required()
            .generator(Generator::Password)
            .rule(Rule::Password),
        FieldSchema::text("settings.clients[0].email", "User email"),
        FieldSchema::select("streamSettings.network", "Transport", NETWORKS_TROJAN)
            .default_value("tcp"),
        FieldSchema::select("streamSettings.security", "Transport security", &["tls"])
            .default_value("tls"),
        FieldSchema::text("streamSettings.tlsSettings.serverName", "SNI").rule(Rule::Domain),
        FieldSchema::text(
            "streamSettings.tlsSettings.certificates[0].certificateFile",
            "Certificate file",
        )
        .rule(Rule::AbsolutePath),
        FieldSchema::text(
            "streamSettings.tlsSettings.certificates[0].keyFile",
            "Key file",
        )
        .rule(Rule::AbsolutePath),
    ]
}

fn socks_fields() -> Vec<FieldSchema> {
    vec![
        FieldSchema::select("settings.auth", "Authentication", &["noauth", "password"])
            .default_value("noauth"),
        FieldSchema::switch("settings.udp", "UDP relay").default_value(true),
        FieldSchema::text("settings.ip", "Relay address")
            .rule(Rule::Ip)
            .default_value("127.0.0.1")
            .visible_when(Condition::truthy("settings.udp")),
        FieldSchema::text("settings.accounts[0].user", "Username")
            .required()
            .visible_when(Condition::equals("settings.auth", "password")),
        FieldSchema::text("settings.accounts[0].pass", "Password")
            .required()
            .generator(Generator::Password)
            .rule(Rule::Password)
            .visible_when(Condition::equals("settings.auth", "password")),
    ]
}

fn http_fields() -> Vec<FieldSchema> {
    vec![
        FieldSchema::integer("settings.timeout", "Idle timeout (seconds)")
            .range(0, 3600)
            .default_value(300),
        FieldSchema::switch("settings.allowTransparent", "Transparent proxying")
            .default_value(false),
    ]
}

fn outbound(protocol: &'static str) -> ProtocolSchema {
    let mut fields = vec![FieldSchema::text("tag", "Tag").required()];
    match protocol {
        "freedom" => {
            fields.push(
                FieldSchema::select(
                    "settings.domainStrategy",
                    "Domain strategy",
                    &["AsIs", "UseIP", "UseIPv4", "UseIPv6"],
                )
                .default_value("AsIs"),
            );
        }
        "blackhole" => {
            fields.push(
                FieldSchema::select(
                    "settings.response.type",
                    "Response type",
                    &["none", "http"],
                )
                .default_value("none"),
            );
        }
        "vmess" | "vless" => {
            let users_prefix = "settings.vnext[0]";
            fields.push(
                FieldSchema::text(&format!("{users_prefix}.address"), "Server address")
                    .required()
                    .rule(Rule::Domain),
            );
            fields.push(
                FieldSchema::integer(&format!("{users_prefix}.port"), "Server port")
                    .required()
                    .range(1, 65535)
                    .rule(Rule::Port)
                    .default_value(443),
            );
            fields.push(
                FieldSchema::text(&format!("{users_prefix}.users[0].id"), "UUID")
                    .required()
                    .generator(Generator::Uuid)
                    .rule(Rule::Uuid),
            );
        }
        "trojan" | "shadowsocks" => {
            fields.push(
                FieldSchema::text("settings.servers[0].address", "Server address")
                    .required()
                    .rule(Rule::Domain),
            );
            fields.push(
                FieldSchema::integer("settings.servers[0].port", "Server port")
                    .required()
                    .range(1, 65535)
                    .rule(Rule::Port)
                    .default_value(443),
            );
            fields.push(
                FieldSchema::text("settings.servers[0].password", "Password")
                    .required()
                    .rule(Rule::Password),
            );
            if protocol == "shadowsocks" {
                fields.push(
                    FieldSchema::select("settings.servers[0].method", "Cipher", SS_CIPHERS)
                        .required()
                        .default_value("aes-256-gcm"),
                );
            }
        }
        _ => {}
    }
    ProtocolSchema {
        kind: ConfigKind::Outbound,
        protocol,
        fields,
    }
}

fn routing_schema() -> ProtocolSchema {
    ProtocolSchema {
        kind: ConfigKind::Routing,
        protocol: "field",
        fields: vec![
            FieldSchema::text("tag", "Tag").required(),
            FieldSchema::select("type", "Rule type", &["field"])
                .required()
                .default_value("field"),
            FieldSchema::text("outboundTag", "Outbound tag").required(),
            FieldSchema::textarea("domain", "Domains"),
            FieldSchema::textarea("ip", "IP ranges"),
            FieldSchema::text("port", "Ports"),
            FieldSchema::select("network", "Network", &["", "tcp", "udp", "tcp,udp"]),
            FieldSchema::multi_select(
                "protocol",
                "Sniffed protocols",
                &["http", "tls", "bittorrent"],
            ),
        ],
    }
}

fn balancer_schema() -> ProtocolSchema {
    ProtocolSchema {
        kind: ConfigKind::Balancer,
        protocol: "balancer",
        fields: vec![
            FieldSchema::text("tag", "Tag").required(),
            FieldSchema::textarea("selector", "Outbound selector").required(),
            FieldSchema::select(
                "strategy.type",
                "Strategy",
                &["random", "leastPing", "leastLoad"],
            )
            .default_value("random"),
        ],
    }
}

pub(super) fn default_document(kind: ConfigKind, protocol: &str) -> Value {
    match kind {
        ConfigKind::Inbound => default_inbound(protocol),
        ConfigKind::Outbound => default_outbound(protocol),
        ConfigKind::Routing => json!({
            "tag": "",
            "type": "field",
            "outboundTag": "",
        }),
        ConfigKind::Balancer => json!({
            "tag": "",
            "selector": [],
            "strategy": {"type": "random"},
        }),
    }
}

fn default_inbound(protocol: &str) -> Value {
    let mut doc = json!({
        "tag": "",
        "port": 443,
        "protocol": protocol,
        "listen": "0.0.0.0",
        "sniffing": {
            "enabled": true,
            "destOverride": ["http", "tls"],
        },
    });

    let extra = match protocol {
        "vless" => json!({
            "settings": {
                "clients": [{
                    "id": Generator::Uuid.generate(),
                    "flow": "xtls-rprx-vision",
                    "email": "",
                }],
                "decryption": "none",
            },
            "streamSettings": {
                "network": "tcp",
                "security": "tls",
                "tlsSettings": {
                    "serverName": "",
                    "certificates": [{
                        "certificateFile": "/path/to/cert.crt",
                        "keyFile": "/path/to/key.key",
                    }],
                    "alpn": ["h2", "http/1.1"],
                },
            },
        }),
        "vmess" => json!({
            "settings": {
                "clients": [{
                    "id": Generator::Uuid.generate(),
                    "alterId": 0,
                    "email": "",
                    "security": "auto",
                }],
            },
            "streamSettings": {
                "network": "tcp",
                "security": "none",
            },
        }),
        "shadowsocks" => json!({
            "settings": {
                "method": "aes-256-gcm",
                "password": Generator::Password.generate(),
                "network": "tcp,udp",
            },
        }),
        "trojan" => json!({
            "settings": {
                "clients": [{
                    "password": super::generate_password(32),
                    "email": "",
                }],
            },
            "streamSettings": {
                "network": "tcp",
                "security": "tls",
                "tlsSettings": {
                    "serverName": "",
                    "certificates": [{
                        "certificateFile": "/path/to/cert.crt",
                        "keyFile": "/path/to/key.key",
                    }],
                    "alpn": ["http/1.1"],
                },
            },
        }),
        "socks" => json!({
            "port": 1080,
            "settings": {
                "auth": "noauth",
                "udp": true,
                "ip": "127.0.0.1",
            },
        }),
        "http" => json!({
            "port": 8080,
            "settings": {
                "timeout": 300,
                "allowTransparent": false,
            },
        }),
        _ => json!({}),
    };

    crate::document::merge(&mut doc, &extra);
    doc
}

fn default_outbound(protocol: &str) -> Value {
    let settings = match protocol {
        "freedom" => json!({"domainStrategy": "AsIs"}),
        "blackhole" => json!({"response": {"type": "none"}}),
        "vmess" => json!({
            "vnext": [{"address": "", "port": 443, "users": [{"id": "", "security": "auto"}]}],
        }),
        "vless" => json!({
            "vnext": [{"address": "", "port": 443, "users": [{"id": "", "encryption": "none"}]}],
        }),
        "trojan" => json!({
            "servers": [{"address": "", "port": 443, "password": ""}],
        }),
        "shadowsocks" => json!({
            "servers": [{"address": "", "port": 443, "method": "aes-256-gcm", "password": ""}],
        }),
        _ => json!({}),
    };
    json!({
        "tag": "",
        "protocol": protocol,
        "settings": settings,
    })
}
