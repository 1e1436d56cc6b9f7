//! Cross-request variable piping inside a serial batch.
//!
//! `inputVariables` maps a variable name to the `requestData` field it
//! fills; `outputVariables` maps a variable name to the `responseData`
//! field it captures. Bad mappings are logged and skipped.

use serde_json::{Map, Value};
use tracing::warn;

use stagehand_core::RequestResult;

use super::BatchRequest;

/// Substitute input variables into the request before dispatch.
pub fn pre_process(variables: &Map<String, Value>, item: &mut BatchRequest) {
    let Some(input) = item.input_variables.as_ref() else {
        return;
    };
    let Some(input) = input.as_object() else {
        warn!(request_type = %item.request.request_type, "inputVariables is not an object, skipping");
        return;
    };

    for (variable, field) in input {
        let Some(field) = field.as_str() else {
            warn!(variable, "input variable mapping is not a string, skipping");
            continue;
        };
        let Some(value) = variables.get(variable) else {
            warn!(variable, "input variable is not defined, skipping");
            continue;
        };
        item.request.set_field(field, value.clone());
    }
}

/// Capture output variables from a finished request.
pub fn post_process(variables: &mut Map<String, Value>, item: &BatchRequest, result: &RequestResult) {
    let Some(output) = item.output_variables.as_ref() else {
        return;
    };
    let Some(output) = output.as_object() else {
        warn!(request_type = %item.request.request_type, "outputVariables is not an object, skipping");
        return;
    };
    let Some(response_data) = result.response_data.as_ref().and_then(Value::as_object) else {
        return;
    };

    for (variable, field) in output {
        let Some(field) = field.as_str() else {
            warn!(variable, "output variable mapping is not a string, skipping");
            continue;
        };
        let Some(value) = response_data.get(field) else {
            warn!(variable, field, "output variable field missing from response, skipping");
            continue;
        };
        let _ = variables.insert(variable.clone(), value.clone());
    }
}
