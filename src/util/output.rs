#![allow(clippy::print_stdout)]

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

static JSON_OUTPUT: Mutex<BTreeMap<String, Value>> = Mutex::new(BTreeMap::new());
static SHOULD_PRINT_OUTPUT: AtomicBool = AtomicBool::new(true);

pub fn set_should_print_output(should_print: bool) {
    SHOULD_PRINT_OUTPUT.store(should_print, Ordering::Relaxed);
}

pub fn print_output(printed_output: &str) {
    if SHOULD_PRINT_OUTPUT.load(Ordering::Relaxed) {
        println!("{}", printed_output);
    }
}

pub fn set_json_output(key: &str, value: &Value) {
    JSON_OUTPUT
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(key.to_string(), value.clone());
}

#[macro_export]
macro_rules! outln {
    ( $fmt:expr $(, $args:expr)*) => {
        $crate::util::print_output(&format!($fmt $(, $args)*))
    };
}

/// Prints everything recorded with [`set_json_output`] as one object, keys
/// sorted.
pub fn print_json_output() -> Result<()> {
    let map: serde_json::Map<String, Value> = JSON_OUTPUT
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
        .into_iter()
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&Value::Object(map))
            .context("Error serializing JSON")?
    );
    Ok(())
}
