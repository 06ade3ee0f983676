//! Example demonstrating Options and EngineError usage

use ember_sdk::types::{self, Options};
use ember_sdk::{EmberErrorExt, EngineError};
use std::time::Duration;

fn main() {
    // Example 1: Building an option bag
    let mut options = Options::new()
        .with(types::CONTEXT_LENGTH, 4096)
        .with("temperature", 0.2);

    // Example 2: Defaults never override caller values
    options.set_default(types::CONTEXT_LENGTH, 2048);
    options.set_default(types::MMAP, true);
    println!("Options: {}", serde_json::to_string(&options).unwrap_or_default());

    // Example 3: Typed accessors
    if let Some(length) = options.get_i64(types::CONTEXT_LENGTH) {
        println!("Context length: {}", length);
    }
    for (key, value) in options.iter() {
        println!("  {} = {}", key, value);
    }

    // Example 4: Errors carry a hint for the user
    let errors = [
        EngineError::no_model(),
        EngineError::Input("input text is empty".into()),
        EngineError::Timeout {
            waited: Duration::from_secs(30),
        },
    ];
    for error in &errors {
        println!(
            "{} (hint: {}, recoverable: {})",
            error,
            error.user_hint(),
            error.is_recoverable()
        );
    }
}
