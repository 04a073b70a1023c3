//! Commands that only look at the registry: types, schema, validate

use super::{collect_params, requested_state, CommandContext};
use crate::cli::{ResourceArgs, SchemaArgs};
use anyhow::Result;
use armctl::modules::azure_rm::RESERVED_PARAMS;
use armctl::modules::validate_arguments;
use armctl::reconcile::diff::redact_value;
use armctl::reconcile::{build_desired_state, build_modifiers, IdContext};
use serde_json::json;

/// Placeholder shown in resource ids when no subscription is configured.
const SUBSCRIPTION_PLACEHOLDER: &str = "{subscription_id}";

pub fn types(ctx: &CommandContext) -> Result<i32> {
    ctx.output.resource_types(ctx.registry.iter());
    Ok(0)
}

pub fn schema(ctx: &CommandContext, args: &SchemaArgs) -> Result<i32> {
    let resource_type = ctx.registry.get(&args.resource_type)?;
    ctx.output.schema(resource_type);
    Ok(0)
}

/// Validate arguments and show the resource id and request body they produce.
pub fn validate(ctx: &CommandContext, args: &ResourceArgs) -> Result<i32> {
    let resource_type = ctx.registry.get(&args.resource_type)?;
    let mut params = collect_params(args)?;
    validate_arguments(resource_type, &params)?;
    let state = requested_state(&params);

    for key in RESERVED_PARAMS {
        params.remove(*key);
    }

    let subscription = ctx
        .subscription_id
        .as_deref()
        .unwrap_or(SUBSCRIPTION_PLACEHOLDER);
    let id = resource_type.resource_id(&params, Some(subscription))?;

    let ids = IdContext::new(
        Some(subscription.to_string()),
        params
            .get("resource_group")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    );
    let desired = build_desired_state(&resource_type.arguments, &params, &ids)?;
    let modifiers = build_modifiers(&resource_type.arguments)?;
    let body = redact_value(&desired.to_value(), &modifiers);

    if ctx.output.is_json() {
        let result = json!({
            "module": resource_type.module_name(),
            "valid": true,
            "state": state,
            "id": id,
            "body": body,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        ctx.output.info(&format!(
            "Arguments are valid for {} (state: {})",
            resource_type.module_name(),
            state
        ));
        println!("id: {}", id);
        println!("body:\n{}", serde_json::to_string_pretty(&body)?);
    }
    Ok(0)
}
