use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use proxyfleet_common::proto::ConfigKind;
use serde::Serialize;
use serde_json::Value;

use crate::app_state::AppState;
use crate::error::{ApiResult, AppError};
use crate::schema::{Condition, FieldKind, FieldSchema, Generator, Rule};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/schemas/{kind}/{protocol}", get(get_schema))
        .route(
            "/api/v1/schemas/{kind}/{protocol}/defaults",
            get(get_defaults),
        )
}

/// Visibility condition as shipped to form renderers.
#[derive(Serialize, utoipa::ToSchema)]
pub(crate) struct ConditionDto {
    pub op: &'static str,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// One schema field as shipped to form renderers.
#[derive(Serialize, utoipa::ToSchema)]
pub(crate) struct SchemaFieldDto {
    pub path: String,
    pub label: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator: Option<Generator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<Rule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionDto>,
}

/// Schema listing response.
#[derive(Serialize, utoipa::ToSchema)]
pub(crate) struct SchemaResponse {
    pub kind: ConfigKind,
    pub protocol: String,
    pub fields: Vec<SchemaFieldDto>,
}

impl From<&FieldSchema> for SchemaFieldDto {
    fn from(field: &FieldSchema) -> Self {
        Self {
            path: field.path.as_str().to_string(),
            label: field.label,
            kind: field.kind,
            required: field.required,
            default: field.default.clone(),
            options: field.options.clone(),
            min: field.min,
            max: field.max,
            generator: field.generator,
            rule: field.rule,
            condition: field.condition.as_ref().map(|condition| match condition {
                Condition::Equals(path, value) => ConditionDto {
                    op: "equals",
                    path: path.as_str().to_string(),
                    value: Some(value.clone()),
                },
                Condition::NotEquals(path, value) => ConditionDto {
                    op: "not-equals",
                    path: path.as_str().to_string(),
                    value: Some(value.clone()),
                },
                Condition::Truthy(path) => ConditionDto {
                    op: "truthy",
                    path: path.as_str().to_string(),
                    value: None,
                },
            }),
        }
    }
}

fn parse_kind(kind: &str) -> ApiResult<ConfigKind> {
    match kind {
        "inbound" => Ok(ConfigKind::Inbound),
        "outbound" => Ok(ConfigKind::Outbound),
        "routing" => Ok(ConfigKind::Routing),
        "balancer" => Ok(ConfigKind::Balancer),
        other => Err(AppError::bad_request(format!(
            "unknown configuration kind {other:?}"
        ))),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/schemas/{kind}/{protocol}",
    params(
        ("kind" = String, Path, description = "Configuration kind"),
        ("protocol" = String, Path, description = "Protocol discriminant")
    ),
    responses(
        (status = 200, description = "Field definitions in schema order", body = SchemaResponse),
        (status = 400, description = "Unknown kind or protocol")
    ),
    security(("operatorBearer" = [])),
    tag = "schemas"
)]
pub(crate) async fn get_schema(
    State(state): State<AppState>,
    Path((kind, protocol)): Path<(String, String)>,
) -> ApiResult<Json<SchemaResponse>> {
    let kind = parse_kind(&kind)?;
    let schema = state
        .schemas
        .get(kind, &protocol)
        .map_err(|err| AppError::bad_request(err.to_string()))?;
    Ok(Json(SchemaResponse {
        kind: schema.kind,
        protocol: schema.protocol.to_string(),
        fields: schema.fields.iter().map(SchemaFieldDto::from).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/schemas/{kind}/{protocol}/defaults",
    params(
        ("kind" = String, Path, description = "Configuration kind"),
        ("protocol" = String, Path, description = "Protocol discriminant")
    ),
    responses(
        (status = 200, description = "Default document with freshly generated secrets"),
        (status = 400, description = "Unknown kind or protocol")
    ),
    security(("operatorBearer" = [])),
    tag = "schemas"
)]
pub(crate) async fn get_defaults(
    State(state): State<AppState>,
    Path((kind, protocol)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let kind = parse_kind(&kind)?;
    let document = state
        .schemas
        .default_document(kind, &protocol)
        .map_err(|err| AppError::bad_request(err.to_string()))?;
    Ok(Json(document))
}
