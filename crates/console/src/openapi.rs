//! OpenAPI document for the operator API.

use utoipa::OpenApi;

use crate::http;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "proxyfleet console",
        description = "Schema-validated proxy configuration with versioned push sync to remote agents"
    ),
    paths(
        http::healthz,
        http::metrics,
        http::agents::create_agent,
        http::agents::list_agents,
        http::agents::get_agent,
        http::agents::remove_agent,
        http::agents::regenerate_credential,
        http::pushes::submit_push,
        http::pushes::push_status,
        http::schemas::get_schema,
        http::schemas::get_defaults,
        http::events::event_feed,
    ),
    components(schemas(
        proxyfleet_common::api::AgentSummary,
        proxyfleet_common::api::ConnectionState,
        proxyfleet_common::api::CreateAgentRequest,
        proxyfleet_common::api::CreateAgentResponse,
        proxyfleet_common::api::RegenerateCredentialResponse,
        proxyfleet_common::api::PushSubmitRequest,
        proxyfleet_common::api::PushSubmitResponse,
        proxyfleet_common::api::PushSnapshot,
        proxyfleet_common::api::PushState,
        proxyfleet_common::api::PushStatusResponse,
        proxyfleet_common::api::FieldErrorEntry,
        proxyfleet_common::api::ValidationErrorBody,
        proxyfleet_common::proto::ConfigKind,
        proxyfleet_common::proto::ConfigMutation,
        proxyfleet_common::proto::MutationOp,
    )),
    tags(
        (name = "agents", description = "Agent registry and credentials"),
        (name = "pushes", description = "Versioned configuration pushes"),
        (name = "schemas", description = "Protocol schemas and defaults"),
        (name = "events", description = "Observer feed"),
        (name = "system", description = "Health and metrics"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_serializes() {
        let doc = ApiDoc::openapi();
        let json = doc.to_json().expect("openapi json");
        assert!(json.contains("/api/v1/agents"));
        assert!(json.contains("PushStatusResponse"));
    }
}
