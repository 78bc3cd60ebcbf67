//! Process memory map scanning
//!
//! Each `/proc/self/maps` line reads
//! `start-end perms offset dev inode pathname`; the base of a module is
//! the start of its first mapping. Parsing is split out so it can be
//! tested against synthetic maps content.

use std::io::BufRead;
use std::path::Path;

use crate::error::ResolveError;

/// Find the base address of `module` in maps-formatted content.
///
/// `module` is matched against the file name of each mapping's
/// pathname, so "libclient.so" matches "/data/app/.../libclient.so"
/// but not "xlibclient.so". The first matching mapping wins.
pub fn parse_maps<R: BufRead>(reader: R, module: &str) -> Result<usize, ResolveError> {
    for line in reader.lines() {
        let line = line?;
        let mut fields = line.split_whitespace();
        let Some(range) = fields.next() else {
            continue;
        };
        // Skip perms, offset, dev, inode; anonymous mappings have no
        // pathname field at all.
        let Some(pathname) = fields.nth(4) else {
            continue;
        };
        let matches = Path::new(pathname)
            .file_name()
            .map(|name| name.to_str() == Some(module))
            .unwrap_or(false);
        if !matches {
            continue;
        }

        let start = range
            .split('-')
            .next()
            .ok_or_else(|| ResolveError::Parse(line.clone()))?;
        return usize::from_str_radix(start, 16).map_err(|_| ResolveError::Parse(line.clone()));
    }

    Err(ResolveError::ModuleNotFound(module.to_string()))
}

/// Base address of a loaded module, from `/proc/self/maps`.
#[cfg(target_os = "linux")]
pub fn module_base(module: &str) -> Result<usize, ResolveError> {
    let file = std::fs::File::open("/proc/self/maps")?;
    let base = parse_maps(std::io::BufReader::new(file), module)?;
    tracing::debug!("Resolved {} base to {:#x}", module, base);
    Ok(base)
}

#[cfg(not(target_os = "linux"))]
pub fn module_base(module: &str) -> Result<usize, ResolveError> {
    Err(ResolveError::ModuleNotFound(format!(
        "{} (maps scanning unavailable on this platform)",
        module
    )))
}

/// Absolute address of `offset` inside `module`, or zero when
/// resolution fails.
///
/// The zero sentinel is deliberate: downstream validity checks already
/// refuse it, so callers can pass the result straight through.
pub fn absolute_address(module: &str, offset: usize) -> usize {
    match module_base(module) {
        Ok(base) => base + offset,
        Err(err) => {
            tracing::debug!("Failed to resolve {}: {}", module, err);
            0
        }
    }
}
