//! Generic `azure_rm_<type>` module.
//!
//! One instance exists per registered [`ResourceType`]. Parameters are the
//! type's arguments plus `state` (`present` or `absent`) and an optional
//! `if_match` ETag; the module builds the resource id, talks to ARM through
//! the shared [`ClientFactory`] and hands everything else to
//! [`reconcile`](crate::reconcile::reconcile).

use super::{Diff, Module, ModuleContext, ModuleOutput, ModuleParams, ParamExt};
use crate::client::{ClientFactory, Precondition, RemoteResource, UpdateMethod};
use crate::error::Result;
use crate::reconcile::diff::redact_value;
use crate::reconcile::{
    reconcile, Action, IdContext, Modifiers, ReconcileOptions, ReconcileOutcome, RequestedState,
};
use crate::registry::ResourceType;
use async_trait::async_trait;
use serde_json::{json, Value};
use similar::{ChangeTag, TextDiff};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Parameters every resource module accepts in addition to its arguments.
pub const RESERVED_PARAMS: &[&str] = &["state", "if_match"];

/// Module managing one ARM resource type.
pub struct AzureRmModule {
    resource_type: ResourceType,
    name: String,
    description: String,
    clients: Arc<dyn ClientFactory>,
}

impl AzureRmModule {
    pub fn new(resource_type: ResourceType, clients: Arc<dyn ClientFactory>) -> Self {
        let name = resource_type.module_name();
        let description = resource_type
            .description
            .clone()
            .unwrap_or_else(|| format!("Manage {}", resource_type.qualified_type()));
        Self {
            resource_type,
            name,
            description,
            clients,
        }
    }

    pub fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    fn build_output(
        &self,
        id: &str,
        outcome: ReconcileOutcome,
        context: &ModuleContext,
    ) -> ModuleOutput {
        let kind = self.resource_type.qualified_type();
        let check = context.check_mode;
        let msg = match outcome.action {
            Action::Create if check => format!("Would create {kind} '{id}'"),
            Action::Create => format!("Created {kind} '{id}'"),
            Action::Update => format!(
                "{} {kind} '{id}' ({} changes)",
                if check { "Would update" } else { "Updated" },
                outcome.change_set.len()
            ),
            Action::Delete if check => format!("Would delete {kind} '{id}'"),
            Action::Delete => format!("Deleted {kind} '{id}'"),
            Action::NoOp if outcome.before.is_some() => format!("{kind} '{id}' is up to date"),
            Action::NoOp => format!("{kind} '{id}' does not exist"),
        };

        let modifiers = &outcome.modifiers;
        let redacted_changes = outcome.change_set.redacted(modifiers);
        let state = outcome
            .result
            .as_ref()
            .map(|v| redact_value(v, modifiers))
            .unwrap_or(Value::Null);

        let mut output = if outcome.changed {
            ModuleOutput::changed(msg)
        } else {
            ModuleOutput::ok(msg)
        };

        if context.diff_mode && outcome.changed {
            output = output.with_diff(state_diff(
                outcome.before.as_ref(),
                outcome.result.as_ref(),
                modifiers,
            ));
        }

        output
            .with_data("action", json!(outcome.action))
            .with_data("id", json!(id))
            .with_data("state", state)
            .with_data("changes", json!(redacted_changes.changes))
            .with_data("warnings", json!(redacted_changes.warnings))
    }
}

#[async_trait]
impl Module for AzureRmModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn validate_params(&self, params: &ModuleParams) -> Result<()> {
        validate_arguments(&self.resource_type, params)
    }

    #[instrument(skip_all, fields(module = %self.name))]
    async fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> Result<ModuleOutput> {
        let requested = requested_state(params)?;
        let precondition = match params.get_string("if_match")? {
            Some(etag) => Precondition::IfMatch(etag),
            None => Precondition::None,
        };

        let mut args = params.clone();
        for key in RESERVED_PARAMS {
            args.remove(*key);
        }

        let id = self
            .resource_type
            .resource_id(&args, context.subscription_id.as_deref())?;
        debug!(%id, %requested, "resolved resource id");

        let client = self
            .clients
            .client(&self.resource_type.provider, &self.resource_type.api_version)?;
        let update_method = if self.resource_type.supports_patch {
            UpdateMethod::Patch
        } else {
            UpdateMethod::Put
        };
        let resource = RemoteResource::new(client, id.clone())
            .with_update_method(update_method)
            .with_precondition(precondition);

        let options = ReconcileOptions {
            check_mode: context.check_mode,
            ids: IdContext::new(
                context.subscription_id.clone(),
                args.get_string("resource_group")?,
            ),
        };

        let outcome = reconcile(
            &self.resource_type.arguments,
            &args,
            requested,
            &resource,
            &options,
        )
        .await?;

        Ok(self.build_output(&id, outcome, context))
    }
}

/// `state` parameter, defaulting to `present`.
pub fn requested_state(params: &ModuleParams) -> Result<RequestedState> {
    params
        .get_string("state")?
        .map(|s| s.parse())
        .transpose()
        .map(Option::unwrap_or_default)
}

/// Check `params` against the schema of `resource_type`. Deleting only needs
/// the arguments that identify the resource.
pub fn validate_arguments(resource_type: &ResourceType, params: &ModuleParams) -> Result<()> {
    match requested_state(params)? {
        RequestedState::Present => resource_type.arguments.validate(params, RESERVED_PARAMS),
        RequestedState::Absent => resource_type
            .arguments
            .identifying_requirements_only()
            .validate(params, RESERVED_PARAMS),
    }
}

/// Line diff of the pretty-printed resource before and after, with `no_log`
/// values hidden.
fn state_diff(before: Option<&Value>, after: Option<&Value>, modifiers: &Modifiers) -> Diff {
    let render = |value: Option<&Value>| match value {
        Some(v) => serde_json::to_string_pretty(&redact_value(v, modifiers))
            .map(|s| s + "\n")
            .unwrap_or_default(),
        None => String::new(),
    };
    let before = render(before);
    let after = render(after);

    let text_diff = TextDiff::from_lines(&before, &after);
    let mut details = String::new();
    let mut additions = 0;
    let mut deletions = 0;
    for change in text_diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => {
                deletions += 1;
                "-"
            }
            ChangeTag::Insert => {
                additions += 1;
                "+"
            }
            ChangeTag::Equal => " ",
        };
        details.push_str(&format!("{}{}", sign, change));
    }

    Diff::new(
        format!("{} lines", before.lines().count()),
        format!(
            "{} lines ({} additions, {} deletions)",
            after.lines().count(),
            additions,
            deletions
        ),
    )
    .with_details(details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ResourceClient;
    use crate::error::Error;
    use crate::reconcile::diff::REDACTED;
    use crate::reconcile::FetchResult;
    use crate::registry::Registry;
    use serde_json::Map;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Resource store keyed by id.
    #[derive(Default)]
    struct MemoryClient {
        resources: Mutex<HashMap<String, Value>>,
        requests: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ResourceClient for MemoryClient {
        async fn get(&self, id: &str) -> FetchResult {
            self.requests.lock().unwrap().push(format!("GET {id}"));
            match self.resources.lock().unwrap().get(id) {
                Some(v) => FetchResult::Found(v.clone().into()),
                None => FetchResult::NotFound,
            }
        }

        async fn create_or_update(
            &self,
            id: &str,
            body: &Value,
            _: &Precondition,
        ) -> Result<Value> {
            self.requests.lock().unwrap().push(format!("PUT {id}"));
            self.resources.lock().unwrap().insert(id.to_string(), body.clone());
            Ok(body.clone())
        }

        async fn update(&self, id: &str, patch: &Value, _: &Precondition) -> Result<Value> {
            self.requests.lock().unwrap().push(format!("PATCH {id}"));
            let mut resources = self.resources.lock().unwrap();
            let current = resources.entry(id.to_string()).or_insert_with(|| json!({}));
            if let (Value::Object(current), Value::Object(patch)) = (current, patch) {
                for (k, v) in patch {
                    current.insert(k.clone(), v.clone());
                }
            }
            Ok(resources[id].clone())
        }

        async fn delete(&self, id: &str, _: &Precondition) -> Result<()> {
            self.requests.lock().unwrap().push(format!("DELETE {id}"));
            self.resources.lock().unwrap().remove(id);
            Ok(())
        }
    }

    struct MemoryFactory(Arc<MemoryClient>);

    impl ClientFactory for MemoryFactory {
        fn client(&self, _provider: &str, _api_version: &str) -> Result<Arc<dyn ResourceClient>> {
            Ok(self.0.clone())
        }
    }

    fn module(name: &str) -> (AzureRmModule, Arc<MemoryClient>) {
        let client = Arc::new(MemoryClient::default());
        let registry = Registry::builtin().unwrap();
        let module = AzureRmModule::new(
            registry.get(name).unwrap().clone(),
            Arc::new(MemoryFactory(client.clone())),
        );
        (module, client)
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn context() -> ModuleContext {
        ModuleContext::new().with_subscription(Some("sub".to_string()))
    }

    const GROUP_ID: &str = "/subscriptions/sub/resourcegroups/rg1";

    #[tokio::test]
    async fn test_create_then_noop() {
        let (module, client) = module("resource_group");
        let p = params(json!({"name": "rg1", "location": "westeurope", "tags": {"env": "prod"}}));

        let first = module.execute(&p, &context()).await.unwrap();
        assert!(first.changed);
        assert_eq!(first.data["action"], json!("create"));
        assert_eq!(first.data["id"], json!(GROUP_ID));

        let second = module.execute(&p, &context()).await.unwrap();
        assert!(!second.changed);
        assert!(second.msg.contains("is up to date"));
        assert_eq!(
            client.requests.lock().unwrap().clone(),
            vec![
                format!("GET {GROUP_ID}"),
                format!("PUT {GROUP_ID}"),
                format!("GET {GROUP_ID}")
            ]
        );
    }

    #[tokio::test]
    async fn test_update_uses_patch_when_supported() {
        let (module, client) = module("resource_group");
        client.resources.lock().unwrap().insert(
            GROUP_ID.to_string(),
            json!({"id": GROUP_ID, "location": "westeurope", "tags": {"env": "dev"}}),
        );

        let output = module
            .execute(
                &params(json!({"name": "rg1", "location": "West Europe", "tags": {"env": "prod"}})),
                &context(),
            )
            .await
            .unwrap();
        assert!(output.changed);
        assert_eq!(output.data["action"], json!("update"));
        assert!(output.msg.contains("(1 changes)"));
        assert!(client
            .requests
            .lock()
            .unwrap()
            .contains(&format!("PATCH {GROUP_ID}")));
    }

    #[tokio::test]
    async fn test_check_mode_sends_no_writes() {
        let (module, client) = module("resource_group");
        let output = module
            .execute(
                &params(json!({"name": "rg1", "location": "westeurope"})),
                &context().with_check_mode(true).with_diff_mode(true),
            )
            .await
            .unwrap();
        assert!(output.changed);
        assert!(output.msg.starts_with("Would create"));
        let diff = output.diff.unwrap();
        assert!(diff.details.unwrap().contains("+  \"location\": \"westeurope\""));
        assert_eq!(
            client.requests.lock().unwrap().clone(),
            vec![format!("GET {GROUP_ID}")]
        );
    }

    #[tokio::test]
    async fn test_absent_only_needs_identifying_arguments() {
        let (module, client) = module("sql_firewall_rule");
        let p = params(json!({
            "resource_group": "rg",
            "server_name": "srv",
            "name": "office",
            "state": "absent"
        }));
        module.validate_params(&p).unwrap();

        let output = module.execute(&p, &context()).await.unwrap();
        assert!(!output.changed);
        assert!(output.msg.contains("does not exist"));
        assert_eq!(client.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_present_requires_body_arguments() {
        let (module, _) = module("sql_firewall_rule");
        let err = module
            .validate_params(&params(json!({
                "resource_group": "rg",
                "server_name": "srv",
                "name": "office"
            })))
            .unwrap_err();
        assert!(matches!(err, Error::MissingArgument(_)));
    }

    #[tokio::test]
    async fn test_no_log_values_are_redacted() {
        let (module, client) = module("key_vault_secret");
        let output = module
            .execute(
                &params(json!({
                    "resource_group": "rg",
                    "vault_name": "kv",
                    "name": "db-password",
                    "value": "hunter2"
                })),
                &context().with_diff_mode(true),
            )
            .await
            .unwrap();

        assert_eq!(output.data["state"]["properties"]["value"], json!(REDACTED));
        assert!(!output.diff.unwrap().details.unwrap().contains("hunter2"));

        let stored = client.resources.lock().unwrap().values().next().cloned().unwrap();
        assert_eq!(stored["properties"]["value"], json!("hunter2"));
    }

    #[tokio::test]
    async fn test_missing_subscription() {
        let (module, _) = module("resource_group");
        let err = module
            .execute(&params(json!({"name": "rg1"})), &ModuleContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingArgument(ref a) if a == "subscription_id"));
    }

    #[test]
    fn test_invalid_state_rejected() {
        let (module, _) = module("resource_group");
        assert!(module
            .validate_params(&params(json!({"name": "rg1", "state": "running"})))
            .is_err());
    }
}
