//! Append command implementation.

use segstore_core::{CoreResult, Store};

/// Runs the append command.
pub fn run(store: &mut Store, text: &str) -> CoreResult<()> {
    store.append(text.as_bytes())?;
    println!("Appended {} bytes", text.len());
    Ok(())
}
