//! Copy and compare between two connections.
//!
//! When both ends share a machine (or the same remote account) the operation
//! runs there in one call. Otherwise data is staged through a temporary file
//! under the source connection's temp dir.

use std::fs;
use std::io::Write;
use std::path::Path;

use oofs_config::log_conn_debug;
use oofs_wire::FileKind;
use tempfile::NamedTempFile;

use crate::{Connection, Locality, OofsError, Result};

fn staging_failure(dir: &Path, err: std::io::Error) -> OofsError {
    OofsError::ResourceExhausted(format!("staging under {}: {}", dir.display(), err))
}

/// Write `data` to a fresh temporary file in `dir`.
fn stage(dir: &Path, data: &[u8]) -> Result<NamedTempFile> {
    let mut staged = NamedTempFile::new_in(dir).map_err(|e| staging_failure(dir, e))?;
    staged
        .write_all(data)
        .and_then(|_| staged.flush())
        .map_err(|e| staging_failure(dir, e))?;
    Ok(staged)
}

async fn shares_machine(a: &mut Connection, b: &mut Connection) -> Result<bool> {
    let both_local =
        a.locality().await? == Locality::Local && b.locality().await? == Locality::Local;
    Ok(both_local || a.same_remote(b).await?)
}

/// Copy `src` on `from` to `dst` on `to`. Directories are copied as a
/// recursive archive.
pub async fn copy_between(
    from: &mut Connection,
    src: impl AsRef<Path>,
    to: &mut Connection,
    dst: impl AsRef<Path>,
) -> Result<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    if shares_machine(from, to).await? {
        return from.copy(src, dst).await;
    }

    let is_dir = from.stat(src).await?.kind == FileKind::Dir;
    let data = if is_dir {
        from.archive(src, true).await?
    } else {
        from.read_file(src).await?
    };
    let temp_dir = from.context().temp_dir.clone();
    let staged = stage(&temp_dir, &data)?;
    drop(data);
    log_conn_debug!("Staged transfer", dir = is_dir);

    match (is_dir, to.locality().await?) {
        (false, Locality::Local) => to.copy(staged.path(), dst).await,
        (false, Locality::Remote) => {
            let data = fs::read(staged.path()).map_err(|e| staging_failure(&temp_dir, e))?;
            to.write_file(dst, data).await
        }
        (true, _) => {
            let data = fs::read(staged.path()).map_err(|e| staging_failure(&temp_dir, e))?;
            to.dearchive(dst, data).await
        }
    }
}

/// Whether `a` on `left` and `b` on `right` hold identical bytes.
pub async fn compare_between(
    left: &mut Connection,
    a: impl AsRef<Path>,
    right: &mut Connection,
    b: impl AsRef<Path>,
) -> Result<bool> {
    let (a, b) = (a.as_ref(), b.as_ref());
    if shares_machine(left, right).await? {
        return left.compare(a, b).await;
    }

    let temp_dir = left.context().temp_dir.clone();
    let staged_a = match left.locality().await? {
        Locality::Local => None,
        Locality::Remote => Some(stage(&temp_dir, &left.read_file(a).await?)?),
    };
    let staged_b = match right.locality().await? {
        Locality::Local => None,
        Locality::Remote => Some(stage(&temp_dir, &right.read_file(b).await?)?),
    };
    let path_a = staged_a.as_ref().map_or(a, |t| t.path());
    let path_b = staged_b.as_ref().map_or(b, |t| t.path());

    // Both files are now on this machine.
    let mut here = left.local_twin();
    here.compare(path_a, path_b).await
}
