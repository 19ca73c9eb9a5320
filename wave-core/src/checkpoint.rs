//! Checkpoint files: a durable, self-describing snapshot of a
//! [`SimulationState`] from which a run resumes bit-identically.
//!
//! Layout, all little-endian:
//!
//! ```text
//! magic    [u8; 8]  b"WAVECKPT"
//! version  u32
//! rows     u64
//! cols     u64
//! step     u64
//! time     f64
//! dt       f64
//! dx       f64
//! damping  f64
//! u        rows*cols f64
//! v        rows*cols f64
//! checksum u64      FNV-1a over every preceding byte
//! ```
//!
//! Writes go to a sibling `.tmp` file which is synced and then renamed over
//! the target, so a crash mid-write leaves the previous checkpoint intact.
//! The directory is synced after the rename.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{CheckpointError, GridError};
use crate::grid::{Field, checked_size};
use crate::state::SimulationState;

pub const MAGIC: [u8; 8] = *b"WAVECKPT";
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 8 + 4 + 3 * 8 + 4 * 8;
const CHECKSUM_LEN: usize = 8;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001B3;

fn fnv1a(mut hash: u64, bytes: &[u8]) -> u64 {
    for &b in bytes {
        hash = (hash ^ b as u64).wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Hashes everything that passes through it.
struct HashingWriter<W> {
    inner: W,
    hash: u64,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hash = fnv1a(self.hash, &buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn write_body<W: Write>(w: &mut W, state: &SimulationState) -> io::Result<()> {
    w.write_all(&MAGIC)?;
    w.write_all(&FORMAT_VERSION.to_le_bytes())?;
    w.write_all(&(state.rows() as u64).to_le_bytes())?;
    w.write_all(&(state.cols() as u64).to_le_bytes())?;
    w.write_all(&state.step.to_le_bytes())?;
    for x in [state.time, state.dt, state.dx, state.damping] {
        w.write_all(&x.to_le_bytes())?;
    }
    for field in [&state.u, &state.v] {
        for &x in field.as_slice() {
            w.write_all(&x.to_le_bytes())?;
        }
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write `state` to `path`, atomically replacing any existing checkpoint.
pub fn save(state: &SimulationState, path: &Path) -> Result<(), CheckpointError> {
    let tmp = temp_path(path);
    let result = write_file(state, &tmp)
        .and_then(|()| fs::rename(&tmp, path))
        .and_then(|()| sync_parent(path));
    if let Err(source) = result {
        if let Err(e) = fs::remove_file(&tmp) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %tmp.display(), error = %e, "failed to remove partial checkpoint");
            }
        }
        return Err(CheckpointError::Write {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

fn write_file(state: &SimulationState, tmp: &Path) -> io::Result<()> {
    if let Some(parent) = tmp.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut w = HashingWriter {
        inner: BufWriter::new(File::create(tmp)?),
        hash: FNV_OFFSET,
    };
    write_body(&mut w, state)?;
    let checksum = w.hash;
    let mut out = w.inner;
    out.write_all(&checksum.to_le_bytes())?;
    let file = out.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
}

/// Make the rename itself durable by syncing the directory entry.
#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Little-endian cursor over a checkpoint image whose length was already
/// validated, so reads cannot run past the end.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    fn f64(&mut self) -> f64 {
        f64::from_le_bytes(self.take())
    }

    fn f64_vec(&mut self, n: usize) -> Vec<f64> {
        (0..n).map(|_| self.f64()).collect()
    }
}

/// Read a checkpoint written by [`save`].
pub fn load(path: &Path) -> Result<SimulationState, CheckpointError> {
    let bytes = fs::read(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            CheckpointError::NotFound(path.to_path_buf())
        } else {
            CheckpointError::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    decode(&bytes, path)
}

fn decode(bytes: &[u8], path: &Path) -> Result<SimulationState, CheckpointError> {
    let truncated = |expected: usize| CheckpointError::Truncated {
        path: path.to_path_buf(),
        expected,
        found: bytes.len(),
    };
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        if bytes.len() >= MAGIC.len() && bytes[..MAGIC.len()] != MAGIC {
            return Err(CheckpointError::InvalidMagic(path.to_path_buf()));
        }
        return Err(truncated(HEADER_LEN + CHECKSUM_LEN));
    }

    let mut cur = Cursor { bytes, pos: 0 };
    if cur.take::<8>() != MAGIC {
        return Err(CheckpointError::InvalidMagic(path.to_path_buf()));
    }
    let version = cur.u32();
    if version != FORMAT_VERSION {
        return Err(CheckpointError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: version,
        });
    }

    let rows = usize::try_from(cur.u64()).unwrap_or(usize::MAX);
    let cols = usize::try_from(cur.u64()).unwrap_or(usize::MAX);
    let invalid = |source: GridError| CheckpointError::InvalidGrid {
        path: path.to_path_buf(),
        source,
    };
    // Dimensions are validated before anything is allocated.
    let cells = checked_size(rows, cols).map_err(invalid)?;
    let expected = cells
        .checked_mul(16)
        .and_then(|n| n.checked_add(HEADER_LEN + CHECKSUM_LEN))
        .ok_or(GridError::Overflow { rows, cols })
        .map_err(invalid)?;
    if bytes.len() < expected {
        return Err(truncated(expected));
    }
    if bytes.len() > expected {
        return Err(CheckpointError::TrailingBytes {
            path: path.to_path_buf(),
            extra: bytes.len() - expected,
        });
    }

    let body = &bytes[..expected - CHECKSUM_LEN];
    let stored = u64::from_le_bytes(
        bytes[expected - CHECKSUM_LEN..]
            .try_into()
            .map_err(|_| truncated(expected))?,
    );
    let computed = fnv1a(FNV_OFFSET, body);
    if stored != computed {
        return Err(CheckpointError::ChecksumMismatch {
            path: path.to_path_buf(),
            stored,
            computed,
        });
    }

    let step = cur.u64();
    let time = cur.f64();
    let dt = cur.f64();
    let dx = cur.f64();
    let damping = cur.f64();
    let u = Field::from_vec(rows, cols, cur.f64_vec(cells)).map_err(invalid)?;
    let v = Field::from_vec(rows, cols, cur.f64_vec(cells)).map_err(invalid)?;

    Ok(SimulationState {
        u,
        v,
        step,
        time,
        dt,
        dx,
        damping,
    })
}

/// Periodic checkpointing to a single, atomically replaced file.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    path: PathBuf,
    interval: u64,
}

impl CheckpointManager {
    /// `interval == 0` disables periodic writes; [`CheckpointManager::write`]
    /// still works on demand.
    pub fn new(path: impl Into<PathBuf>, interval: u64) -> Self {
        CheckpointManager {
            path: path.into(),
            interval,
        }
    }

    pub fn due(&self, step: u64) -> bool {
        self.interval > 0 && step > 0 && step % self.interval == 0
    }

    pub fn write(&self, state: &SimulationState) -> Result<(), CheckpointError> {
        save(state, &self.path)?;
        debug!(
            path = %self.path.display(),
            step = state.step,
            time = state.time,
            "checkpoint written"
        );
        Ok(())
    }

    /// The stored state, or `None` when no checkpoint exists yet.
    pub fn resume(&self) -> Result<Option<SimulationState>, CheckpointError> {
        match load(&self.path) {
            Ok(state) => Ok(Some(state)),
            Err(CheckpointError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> SimulationState {
        let mut s = SimulationState::new(4, 5, 0.125).unwrap().with_dt(0.02);
        for (k, x) in s.u.as_mut_slice().iter_mut().enumerate() {
            *x = (k as f64).sin();
        }
        for (k, x) in s.v.as_mut_slice().iter_mut().enumerate() {
            *x = -(k as f64) / 3.0;
        }
        s.step = 77;
        s.time = 77.0 * 0.02;
        s
    }

    #[test]
    fn round_trip_preserves_bits() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.ckpt");
        let s = sample();
        save(&s, &path).unwrap();
        let back = load(&path).unwrap();
        assert_eq!(back, s);
        for (a, b) in back.u.as_slice().iter().zip(s.u.as_slice()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn file_size_matches_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.ckpt");
        save(&sample(), &path).unwrap();
        let len = fs::metadata(&path).unwrap().len() as usize;
        assert_eq!(len, HEADER_LEN + 2 * 20 * 8 + CHECKSUM_LEN);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = load(&dir.path().join("absent.ckpt")).unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }

    #[test]
    fn truncated_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.ckpt");
        save(&sample(), &path).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 9]).unwrap();
        assert!(matches!(
            load(&path).unwrap_err(),
            CheckpointError::Truncated { .. }
        ));

        fs::write(&path, &bytes[..20]).unwrap();
        assert!(matches!(
            load(&path).unwrap_err(),
            CheckpointError::Truncated { .. }
        ));
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.ckpt");
        save(&sample(), &path).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(&[0, 1, 2]);
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            load(&path).unwrap_err(),
            CheckpointError::TrailingBytes { extra: 3, .. }
        ));
    }

    #[test]
    fn flipped_bit_fails_checksum() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.ckpt");
        save(&sample(), &path).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes[HEADER_LEN + 13] ^= 0x04;
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            load(&path).unwrap_err(),
            CheckpointError::ChecksumMismatch { .. }
        ));
    }

    #[test]
    fn wrong_magic_and_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.ckpt");
        save(&sample(), &path).unwrap();
        let good = fs::read(&path).unwrap();

        let mut bad_magic = good.clone();
        bad_magic[0] = b'X';
        fs::write(&path, &bad_magic).unwrap();
        assert!(matches!(
            load(&path).unwrap_err(),
            CheckpointError::InvalidMagic(_)
        ));

        let mut bad_version = good;
        bad_version[8..12].copy_from_slice(&9u32.to_le_bytes());
        fs::write(&path, &bad_version).unwrap();
        assert!(matches!(
            load(&path).unwrap_err(),
            CheckpointError::UnsupportedVersion { found: 9, .. }
        ));
    }

    #[test]
    fn absurd_dimensions_do_not_allocate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.ckpt");
        save(&sample(), &path).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes[12..20].copy_from_slice(&u64::MAX.to_le_bytes());
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            load(&path).unwrap_err(),
            CheckpointError::InvalidGrid { .. }
        ));
    }

    #[test]
    fn overwrite_replaces_previous_checkpoint() {
        let dir = TempDir::new().unwrap();
        let mgr = CheckpointManager::new(dir.path().join("nested/run.ckpt"), 10);
        assert!(mgr.resume().unwrap().is_none());

        let mut s = sample();
        mgr.write(&s).unwrap();
        s.step = 90;
        mgr.write(&s).unwrap();
        assert_eq!(mgr.resume().unwrap().unwrap().step, 90);
    }

    #[test]
    fn due_respects_interval() {
        let mgr = CheckpointManager::new("x.ckpt", 25);
        assert!(!mgr.due(0));
        assert!(!mgr.due(24));
        assert!(mgr.due(25));
        assert!(mgr.due(50));
        assert!(!CheckpointManager::new("x.ckpt", 0).due(25));
    }

    #[test]
    fn corrupt_checkpoint_is_not_a_fresh_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.ckpt");
        fs::write(&path, b"WAVECKPT garbage").unwrap();
        let mgr = CheckpointManager::new(&path, 1);
        assert!(mgr.resume().is_err());
    }

    #[test]
    fn save_replaces_in_place_and_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.ckpt");
        let mut s = sample();
        save(&s, &path).unwrap();
        s.step += 1;
        save(&s, &path).unwrap();

        assert_eq!(load(&path).unwrap().step, 78);
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![OsString::from("run.ckpt")]);
    }
}
