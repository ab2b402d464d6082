//! Save and resume command implementations.

use super::{from_hex, to_hex};
use segstore_core::Store;

/// Bookmarks the write position and prints the token wire bytes as hex.
pub fn save(store: &mut Store) -> Result<(), Box<dyn std::error::Error>> {
    let token = store.save()?;
    println!("{}", to_hex(&store.encode_token(&token)));
    Ok(())
}

/// Resumes at a token printed by [`save`].
pub fn resume(store: &mut Store, token: &str) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = from_hex(token)?;
    let token = store.decode_token(&bytes)?;
    store.resume(token)?;
    println!("Resumed");
    Ok(())
}
