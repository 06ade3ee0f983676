use ember_sdk::errors::{EmberErrorExt, EngineError};
use ember_sdk::types::{Options, RECOGNIZED_KEYS};
use proptest::prelude::*;
use std::time::Duration;

// Every error variant yields a static, non-empty hint that never echoes
// the text the error was built from.
proptest! {
    #[test]
    fn test_error_user_hint_completeness(error_str in "[a-z]{12,32}") {
        let errs = vec![
            EngineError::Input(error_str.clone()),
            EngineError::State(error_str.clone()),
            EngineError::Backend(error_str.clone()),
            EngineError::Resource(error_str.clone()),
            EngineError::Config(error_str.clone()),
            EngineError::Io(error_str.clone()),
            EngineError::Timeout { waited: Duration::from_millis(error_str.len() as u64) },
            EngineError::Shutdown,
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!hint.contains(&error_str));
        }
    }
}

// Caller-provided options always win over load-time defaults.
proptest! {
    #[test]
    fn test_set_default_never_overrides(
        provided in proptest::collection::btree_map(
            proptest::sample::select(RECOGNIZED_KEYS.to_vec()),
            any::<i64>(),
            0..5,
        ),
        fallback in any::<i64>(),
    ) {
        let mut options = Options::new();
        for (key, value) in &provided {
            options.set(*key, *value);
        }
        for key in RECOGNIZED_KEYS {
            options.set_default(key, fallback);
        }

        prop_assert_eq!(options.len(), RECOGNIZED_KEYS.len());
        for key in RECOGNIZED_KEYS {
            let expected = provided.get(key).copied().unwrap_or(fallback);
            prop_assert_eq!(options.get_i64(key), Some(expected));
        }
    }
}
