use crate::records::SpaceUsage;
use log::debug;
use std::ffi::CString;
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Capacity of the filesystem mounted at `mount_point` via `statvfs(3)`
///
/// Returns `None` when the call fails (unmounted, permission denied, path
/// with interior NUL).
pub fn filesystem_usage(mount_point: &Path) -> Option<SpaceUsage> {
    let c_path = CString::new(mount_point.as_os_str().as_bytes()).ok()?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();
    // SAFETY: c_path is a valid NUL-terminated string and stat points to writable memory
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        debug!(
            "statvfs({}) failed: {}",
            mount_point.display(),
            std::io::Error::last_os_error()
        );
        return None;
    }
    // SAFETY: statvfs returned 0, so the buffer is initialized
    let stat = unsafe { stat.assume_init() };

    let fragment = stat.f_frsize as u64;
    Some(usage_from_blocks(
        fragment,
        stat.f_blocks as u64,
        stat.f_bavail as u64,
    ))
}

/// Derive byte counts from block counts; free space is what unprivileged users can use
pub fn usage_from_blocks(block_size: u64, total_blocks: u64, available_blocks: u64) -> SpaceUsage {
    let total_bytes = block_size.saturating_mul(total_blocks);
    let free_bytes = block_size.saturating_mul(available_blocks);
    let used_bytes = total_bytes.saturating_sub(free_bytes);
    let used_pct = (total_bytes > 0)
        .then(|| ((used_bytes as f64 / total_bytes as f64 * 100.0) * 100.0).round() / 100.0);
    SpaceUsage {
        total_bytes,
        free_bytes,
        used_bytes,
        used_pct,
    }
}
