//! Apply and plan commands

use super::{collect_params, requested_state, CommandContext};
use crate::cli::ResourceArgs;
use anyhow::Result;
use armctl::client::{ArmClientFactory, ClientFactory};
use armctl::modules::ModuleRegistry;
use std::sync::Arc;

/// Reconcile one resource. `plan` runs this with `force_check` set.
pub async fn execute(ctx: &CommandContext, args: &ResourceArgs, force_check: bool) -> Result<i32> {
    let resource_type = ctx.registry.get(&args.resource_type)?;
    let module_name = resource_type.module_name();
    let params = collect_params(args)?;
    let check_mode = ctx.check_mode || force_check;

    let clients: Arc<dyn ClientFactory> =
        Arc::new(ArmClientFactory::from_config(&ctx.config, ctx.cancel.clone())?);
    let modules = ModuleRegistry::from_resource_types(&ctx.registry, clients);

    ctx.output.section(&format!(
        "{} [{}]{}",
        if check_mode { "PLAN" } else { "APPLY" },
        module_name,
        if check_mode { " (check mode)" } else { "" }
    ));
    ctx.output.debug(&format!(
        "requested state: {}, api-version {}",
        requested_state(&params),
        resource_type.api_version
    ));

    let spinner = ctx.output.spinner(&format!("Reconciling {}", resource_type.qualified_type()));
    let result = modules
        .execute(&module_name, &params, &ctx.module_context(check_mode))
        .await;
    spinner.finish_and_clear();

    let output = result?;
    ctx.output.module_result(&module_name, &output);
    ctx.output
        .debug(&format!("finished in {:.1}s", ctx.output.elapsed().as_secs_f64()));
    Ok(0)
}
