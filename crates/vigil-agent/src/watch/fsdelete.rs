//! File-deletion watcher.
//!
//! Watches each configured directory (non-recursive) for files deleted in
//! place or moved out. A directory that cannot be watched is logged and
//! skipped; the watcher only aborts when no directory could be watched at
//! all.

use std::path::{Path, PathBuf};

use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, WatchDescriptor};
use tracing::{debug, info, warn};
use vigil_core::event::EventKind;

use super::{WatchCtx, WatchError, POLL_INTERVAL};

/// Watches `dirs`, emitting a `FILE_DELETE` event per delete/move-out.
pub fn run(ctx: WatchCtx<'_>, dirs: &[PathBuf]) -> Result<(), WatchError> {
    let inotify = Inotify::init(InitFlags::IN_NONBLOCK)?;
    let mask = AddWatchFlags::IN_DELETE | AddWatchFlags::IN_MOVED_FROM;

    let mut watches: Vec<(WatchDescriptor, PathBuf)> = Vec::with_capacity(dirs.len());
    for dir in dirs {
        match inotify.add_watch(dir.as_path(), mask) {
            Ok(wd) => {
                info!(dir = %dir.display(), "watching for deletions");
                watches.push((wd, dir.clone()));
            }
            Err(errno) => {
                warn!(dir = %dir.display(), %errno, "cannot watch directory, skipping");
            }
        }
    }
    if watches.is_empty() {
        return Err(WatchError::NoWatchableDirs);
    }

    while ctx.run.is_running() {
        let events = match inotify.read_events() {
            Ok(events) => events,
            Err(nix::errno::Errno::EAGAIN) => {
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }
            Err(errno) => return Err(WatchError::Notify(errno)),
        };

        for event in events {
            let Some((_, dir)) = watches.iter().find(|(wd, _)| *wd == event.wd) else {
                continue;
            };
            let Some(name) = event.name else {
                continue;
            };
            let message = format_message(&event.mask, &dir.join(name));
            debug!(message = %message, "deletion event");
            ctx.emit(EventKind::FileDelete, &message);
        }
    }

    Ok(())
}

fn format_message(mask: &AddWatchFlags, path: &Path) -> String {
    if mask.contains(AddWatchFlags::IN_DELETE) {
        format!("Deleted file: {}", path.display())
    } else {
        format!("Moved out file: {}", path.display())
    }
}
