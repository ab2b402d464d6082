//! Consume command implementation.

use segstore_core::Store;
use std::io::Write;

/// Chunk size used when streaming to stdout.
const CHUNK: usize = 8 * 1024;

/// Runs the consume command, writing the bytes to stdout.
pub fn run(store: &mut Store, max: Option<usize>) -> Result<(), Box<dyn std::error::Error>> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let consumed = copy(store, &mut out, max)?;
    out.flush()?;
    tracing::debug!(bytes = consumed, "consumed");
    Ok(())
}

fn copy(
    store: &mut Store,
    out: &mut impl Write,
    max: Option<usize>,
) -> Result<usize, Box<dyn std::error::Error>> {
    let mut remaining = max.unwrap_or(usize::MAX);
    let mut buf = vec![0u8; CHUNK];
    let mut total = 0;

    while remaining > 0 {
        let want = remaining.min(CHUNK);
        let n = store.consume(&mut buf[..want])?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        remaining -= n;
        total += n;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(bytes: &[u8]) -> Store {
        let mut store = Store::open_in_memory().unwrap();
        let token = store.save().unwrap();
        store.append(bytes).unwrap();
        store.resume(token).unwrap();
        store
    }

    #[test]
    fn copies_everything_by_default() {
        let mut store = store_with(b"hello world");
        let mut out = Vec::new();
        assert_eq!(copy(&mut store, &mut out, None).unwrap(), 11);
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn respects_max() {
        let mut store = store_with(b"hello world");
        let mut out = Vec::new();
        assert_eq!(copy(&mut store, &mut out, Some(5)).unwrap(), 5);
        assert_eq!(out, b"hello");
    }
}
