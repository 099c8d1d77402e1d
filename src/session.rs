//! Session bridge between the model runtime and the dispatcher.
//!
//! A live session delivers tool calls in batches. [`handle_tool_call`] runs
//! each call through [`dispatch`] in order and wraps the outcome as a
//! [`FunctionResponse`] carrying the tool's scheduling. Unknown tools get a
//! short apology instead of an error so the conversation keeps going.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::error::DispatchError;
use crate::tools::{dispatch, find_spec, FunctionCall, Scheduling, ToolContext};

/// One tool-call event as delivered by the model runtime.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallEvent {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

/// The reply to one function call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    /// Always `{"result": ...}`.
    pub response: Value,
    pub scheduling: Scheduling,
}

fn unknown_tool_reply(name: &str) -> String {
    format!(
        "I'm sorry, I can't do that. The tool \"{}\" isn't available.",
        name
    )
}

/// Dispatch every call of a batch, in order.
pub async fn handle_tool_call(calls: &[FunctionCall], ctx: &ToolContext) -> Vec<FunctionResponse> {
    let mut responses = Vec::with_capacity(calls.len());

    for call in calls {
        let scheduling = find_spec(&call.name)
            .map(|spec| spec.scheduling)
            .unwrap_or(Scheduling::Interrupt);

        let result = match dispatch(call, ctx).await {
            Ok(response) => serde_json::to_value(&response).unwrap_or_else(|e| {
                warn!(tool = %call.name, error = %e, "tool response is not serializable");
                Value::Null
            }),
            Err(DispatchError::UnknownTool(name)) => {
                warn!(tool = %name, "model called an unknown tool");
                Value::String(unknown_tool_reply(&name))
            }
        };

        responses.push(FunctionResponse {
            id: call.id.clone(),
            name: call.name.clone(),
            response: json!({ "result": result }),
            scheduling,
        });
    }

    responses
}
