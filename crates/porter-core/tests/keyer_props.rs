use porter_core::{
    canonical_json, validate_transition, ActionKind, ActionStatus, IdempotencyKey,
    IdempotencyKeyer,
};
use proptest::prelude::*;
use serde_json::{Map, Value};

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::from),
        "[a-z0-9 ]{0,8}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

fn arb_kind() -> impl Strategy<Value = ActionKind> {
    (0..ActionKind::ALL.len()).prop_map(|i| ActionKind::ALL[i])
}

fn arb_status() -> impl Strategy<Value = ActionStatus> {
    prop_oneof![
        Just(ActionStatus::Pending),
        Just(ActionStatus::Ready),
        Just(ActionStatus::Running),
        Just(ActionStatus::Succeeded),
        Just(ActionStatus::Failed),
        Just(ActionStatus::SkippedBlocked),
    ]
}

proptest! {
    #[test]
    fn prop_key_is_pure(kind in arb_kind(), source in "[a-z0-9#-]{1,12}", params in arb_json()) {
        let keyer = IdempotencyKeyer::new();
        let a = keyer.key(kind, &source, &params);
        let b = IdempotencyKeyer::new().key(kind, &source, &params.clone());
        prop_assert_eq!(&a, &b);
        prop_assert!(IdempotencyKey::parse(a.as_str()).is_ok());
    }

    #[test]
    fn prop_canonical_form_survives_reparse(params in arb_json()) {
        let text = serde_json::to_string_pretty(&params).unwrap();
        let reparsed: Value = serde_json::from_str(&text).unwrap();
        prop_assert_eq!(canonical_json(&params), canonical_json(&reparsed));
    }

    #[test]
    fn prop_terminal_statuses_have_no_exit(from in arb_status(), to in arb_status()) {
        if from.is_terminal() {
            prop_assert!(validate_transition(from, to).is_err());
        }
    }
}
