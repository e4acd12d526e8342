pub mod file_filter;
pub mod graph_file;
pub mod path_file;

use std::io::Read;

use anyhow::{bail, Context, Result};

/// Loaders reject files claiming more colours than this.
pub const MAX_FILE_COLOURS: usize = 10_000;

pub(crate) fn read_u8(r: &mut impl Read, what: &str, path: &str) -> Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)
        .with_context(|| format!("reading {} [{}]", what, path))?;
    Ok(b[0])
}

pub(crate) fn read_u32(r: &mut impl Read, what: &str, path: &str) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)
        .with_context(|| format!("reading {} [{}]", what, path))?;
    Ok(u32::from_le_bytes(b))
}

pub(crate) fn read_u64(r: &mut impl Read, what: &str, path: &str) -> Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)
        .with_context(|| format!("reading {} [{}]", what, path))?;
    Ok(u64::from_le_bytes(b))
}

/// `{u32 len, bytes}` string, the layout both headers share.
pub(crate) fn read_len_string(r: &mut impl Read, what: &str, path: &str) -> Result<String> {
    let len = read_u32(r, what, path)? as usize;
    if len > (1 << 20) {
        bail!("Implausible {} length {} [{}]", what, len, path);
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)
        .with_context(|| format!("reading {} [{}]", what, path))?;
    String::from_utf8(buf).with_context(|| format!("{} is not UTF-8 [{}]", what, path))
}

pub(crate) fn len_string_bytes(s: &str) -> usize {
    4 + s.len()
}

pub(crate) fn write_len_string(w: &mut impl std::io::Write, s: &str) -> Result<()> {
    w.write_all(&(s.len() as u32).to_le_bytes())?;
    w.write_all(s.as_bytes())?;
    Ok(())
}
