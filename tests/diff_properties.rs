//! Property-based tests for state comparison and action selection.

use armctl::reconcile::diff::scalars_equal;
use armctl::reconcile::{
    build_desired_state, decide_action, diff, Action, ArgType, ArgumentSchema, ArgumentSpec,
    ChangeSet, Comparison, DesiredState, FieldChange, FieldPath, IdContext, Modifier, Modifiers,
    ObservedState, RequestedState,
};
use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

// ============================================================================
// Strategies
// ============================================================================

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-zA-Z0-9 _.-]{0,16}".prop_map(Value::String),
    ]
}

/// Nested objects of scalars and scalar lists, keyed by lowercase names.
fn body_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        4 => scalar(),
        1 => vec(scalar(), 0..4).prop_map(Value::Array),
    ];
    leaf.prop_recursive(3, 24, 5, |inner| {
        btree_map("[a-z]{1,6}", inner, 0..5)
            .prop_map(|m| Value::Object(m.into_iter().collect()))
    })
}

fn body() -> impl Strategy<Value = Map<String, Value>> {
    btree_map("[a-z]{1,6}", body_value(), 0..6).prop_map(|m| m.into_iter().collect())
}

fn requested() -> impl Strategy<Value = RequestedState> {
    prop_oneof![Just(RequestedState::Present), Just(RequestedState::Absent)]
}

fn one_change() -> ChangeSet {
    let path = FieldPath::parse("/properties/enabled").unwrap();
    ChangeSet {
        changes: vec![FieldChange {
            path: path.clone(),
            container: path,
            desired: json!(true),
            observed: Some(json!(false)),
            comparison: Comparison::Default,
        }],
        warnings: vec![],
    }
}

// ============================================================================
// Comparison
// ============================================================================

proptest! {
    #[test]
    fn prop_identical_state_has_no_changes(desired in body()) {
        let observed = ObservedState::new(Value::Object(desired.clone()));
        let changes = diff(&DesiredState::from_map(desired), &observed, &Modifiers::new());
        prop_assert!(changes.is_empty());
        prop_assert!(changes.warnings.is_empty());
    }

    #[test]
    fn prop_extra_remote_fields_are_not_changes(desired in body(), extra in body_value()) {
        let mut observed = desired.clone();
        observed.insert("_extra".to_string(), extra);
        observed.insert("id".to_string(), json!("/subscriptions/sub/resourcegroups/rg1"));

        let changes = diff(
            &DesiredState::from_map(desired),
            &ObservedState::new(Value::Object(observed)),
            &Modifiers::new(),
        );
        prop_assert!(changes.is_empty());
    }

    #[test]
    fn prop_scalar_lists_compare_without_order(items in vec(scalar(), 0..6), seed in any::<u64>()) {
        let mut shuffled = items.clone();
        if !shuffled.is_empty() {
            let shift = (seed as usize) % shuffled.len();
            shuffled.rotate_left(shift);
        }

        let mut desired = Map::new();
        desired.insert("items".to_string(), Value::Array(items));
        let observed = json!({"items": shuffled});

        let changes = diff(
            &DesiredState::from_map(desired),
            &ObservedState::new(observed),
            &Modifiers::new(),
        );
        prop_assert!(changes.is_empty());
    }

    #[test]
    fn prop_differing_field_is_reported_at_its_path(
        context in body(),
        wanted in "[a-z]{1,8}",
        actual in "[a-z]{1,8}",
    ) {
        prop_assume!(wanted != actual);

        let mut desired = context.clone();
        desired.insert("Target".to_string(), json!(wanted));
        let mut observed = context;
        observed.insert("Target".to_string(), json!(actual));

        let desired = DesiredState::from_map(desired);
        let observed = ObservedState::new(Value::Object(observed));
        let changes = diff(&desired, &observed, &Modifiers::new());

        let paths: Vec<String> = changes.paths().map(ToString::to_string).collect();
        prop_assert_eq!(paths, vec!["/Target".to_string()]);
        prop_assert_eq!(changes.patch_body(&desired), json!({"Target": wanted}));
    }

    #[test]
    fn prop_ignored_fields_never_differ(
        desired_value in body_value(),
        observed_value in body_value(),
    ) {
        let modifiers = Modifiers::new()
            .with(FieldPath::parse("/Target").unwrap(), Modifier::ignore());

        let mut desired = Map::new();
        desired.insert("Target".to_string(), desired_value);
        let observed = json!({"Target": observed_value});

        let changes = diff(
            &DesiredState::from_map(desired),
            &ObservedState::new(observed),
            &modifiers,
        );
        prop_assert!(changes.is_empty());
    }

    #[test]
    fn prop_location_ignores_case_and_spaces(region in "[a-zA-Z]{1,8}( [a-zA-Z]{1,8}){0,2}") {
        let canonical = region.replace(' ', "").to_lowercase();
        prop_assert!(scalars_equal(&json!(region), &json!(canonical), Comparison::Location));
    }

    #[test]
    fn prop_insensitive_comparison_is_symmetric(
        a in "[a-zA-Z0-9]{0,10}",
        b in "[a-zA-Z0-9]{0,10}",
    ) {
        prop_assert_eq!(
            scalars_equal(&json!(a), &json!(b), Comparison::Insensitive),
            scalars_equal(&json!(b), &json!(a), Comparison::Insensitive)
        );
        prop_assert!(scalars_equal(
            &json!(a.to_uppercase()),
            &json!(a.to_lowercase()),
            Comparison::Insensitive
        ));
    }
}

// ============================================================================
// Action selection
// ============================================================================

proptest! {
    #[test]
    fn prop_action_follows_decision_table(
        exists in any::<bool>(),
        state in requested(),
        has_changes in any::<bool>(),
    ) {
        let changes = if has_changes { one_change() } else { ChangeSet::default() };
        let action = decide_action(exists, &DesiredState::new(), &changes, state);

        let expected = match (exists, state) {
            (false, RequestedState::Present) => Action::Create,
            (true, RequestedState::Absent) => Action::Delete,
            (true, RequestedState::Present) if has_changes => Action::Update,
            _ => Action::NoOp,
        };
        prop_assert_eq!(action, expected);
        prop_assert_eq!(action.is_change(), action != Action::NoOp);
    }

    #[test]
    fn prop_converged_resource_needs_nothing(desired in body()) {
        // After a create the remote matches the desired state, so the next run is a no-op.
        let desired = DesiredState::from_map(desired);
        let observed = ObservedState::new(desired.to_value());
        let changes = diff(&desired, &observed, &Modifiers::new());
        prop_assert_eq!(
            decide_action(true, &desired, &changes, RequestedState::Present),
            Action::NoOp
        );
    }
}

// ============================================================================
// Desired state
// ============================================================================

proptest! {
    #[test]
    fn prop_unset_arguments_are_left_out(
        values in vec(proptest::option::of("[a-z]{1,8}"), 3),
    ) {
        let names = ["alpha", "beta", "gamma"];
        let schema = names.iter().fold(ArgumentSchema::new(), |schema, name| {
            schema.with(*name, ArgumentSpec::new(ArgType::Str).disposition("/properties/*"))
        });

        let mut params = Map::new();
        params.insert("name".to_string(), json!("ignored"));
        for (name, value) in names.iter().zip(&values) {
            params.insert(name.to_string(), value.clone().map_or(Value::Null, Value::String));
        }

        let desired = build_desired_state(&schema, &params, &IdContext::default()).unwrap();

        for (name, value) in names.iter().zip(&values) {
            let path = FieldPath::parse(&format!("/properties/{name}")).unwrap();
            prop_assert_eq!(desired.get(&path).cloned(), value.clone().map(Value::String));
        }
        prop_assert_eq!(desired.is_empty(), values.iter().all(Option::is_none));
    }
}
