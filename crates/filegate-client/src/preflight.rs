//! Parallel pre-flight HEAD probes and skip-unchanged detection (§4.4
//! operation 2).

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use filegate_schema::Object;

use crate::error::ClientError;
use crate::walk::WalkEntry;

/// Bound on concurrent `GetObject`/HEAD probes (§4.4: "a fixed small
/// bound, e.g. 8").
pub const DEFAULT_PARALLEL_HEADS: usize = 8;

/// `remote` is `None` when the probe found no object at that path.
///
/// - absent remote => upload
/// - size mismatch => upload
/// - both modtimes known and differ at second precision => upload
/// - otherwise => skip
pub fn should_skip(local: &WalkEntry, remote: Option<&Object>) -> bool {
    let Some(remote) = remote else { return false };
    if remote.size != local.size {
        return false;
    }
    if let (Some(local_mt), Some(remote_mt)) = (local.modtime, remote.effective_modtime()) {
        if local_mt.timestamp() != remote_mt.timestamp() {
            return false;
        }
    }
    true
}

/// Probes every entry concurrently (bounded by `parallel_heads`), returning
/// the entries that survive [`should_skip`] in original order. Per-probe
/// errors are collected but never abort the walk; cancellation propagates
/// immediately as [`ClientError::Cancelled`] (§4.4 "Concurrency contract").
pub async fn partition_unchanged<F, Fut>(
    entries: Vec<WalkEntry>,
    parallel_heads: usize,
    cancellation: &CancellationToken,
    probe: F,
) -> Result<(Vec<WalkEntry>, Vec<String>), ClientError>
where
    F: Fn(WalkEntry) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = (WalkEntry, Result<Option<Object>, ClientError>)> + Send,
{
    let parallel_heads = parallel_heads.max(1);
    let probed = stream::iter(entries)
        .map(probe)
        .buffer_unordered(parallel_heads);
    tokio::pin!(probed);

    let mut upload = Vec::new();
    let mut errors = Vec::new();

    loop {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(ClientError::Cancelled),
            next = probed.next() => {
                match next {
                    Some((entry, Ok(remote))) => {
                        if !should_skip(&entry, remote.as_ref()) {
                            upload.push(entry);
                        }
                    }
                    Some((entry, Err(e))) => {
                        errors.push(format!("{}: {e}", entry.rel_path));
                        upload.push(entry);
                    }
                    None => break,
                }
            }
        }
    }

    Ok((upload, errors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn entry(size: u64, modtime: Option<chrono::DateTime<chrono::Utc>>) -> WalkEntry {
        WalkEntry {
            rel_path: "a.txt".into(),
            local_path: PathBuf::from("/tmp/a.txt"),
            size,
            modtime,
        }
    }

    #[test]
    fn absent_remote_uploads() {
        assert!(!should_skip(&entry(5, None), None));
    }

    #[test]
    fn size_mismatch_uploads() {
        let remote = Object { size: 6, ..Object::new("b", "/a.txt") };
        assert!(!should_skip(&entry(5, None), Some(&remote)));
    }

    #[test]
    fn matching_size_and_unknown_modtime_skips() {
        let remote = Object { size: 5, ..Object::new("b", "/a.txt") };
        assert!(should_skip(&entry(5, None), Some(&remote)));
    }

    fn ymd(y: i32, m: u32, d: u32) -> chrono::DateTime<chrono::Utc> {
        use chrono::TimeZone;
        chrono::Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn differing_modtime_uploads() {
        let remote = Object { size: 5, modtime: Some(ymd(2024, 1, 2)), ..Object::new("b", "/a.txt") };
        assert!(!should_skip(&entry(5, Some(ymd(2024, 1, 1))), Some(&remote)));
    }

    #[test]
    fn matching_size_and_modtime_skips() {
        let t = ymd(2024, 1, 1);
        let remote = Object { size: 5, modtime: Some(t), ..Object::new("b", "/a.txt") };
        assert!(should_skip(&entry(5, Some(t)), Some(&remote)));
    }
}
