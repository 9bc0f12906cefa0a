//! Polling file watcher for hot-reloading shaders and configuration.
//!
//! The service is owned by whoever needs it. A background polling thread only forwards
//! filesystem events; callbacks run on the thread that calls [`FileWatchService::poll`].

use notify::{Config as NotifyConfig, Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to find file or directory at '{0}'")]
    PathNotFound(PathBuf),
    #[error("wildcard '{0}' does not match any file")]
    NoWildcardMatch(PathBuf),
    #[error("file watch service has been shut down")]
    ShutDown,
    #[error(transparent)]
    Notify(#[from] notify::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

pub type WatchCallback = Box<dyn FnMut(&[PathBuf])>;

struct Registration {
    id: WatchId,
    root: PathBuf,
    pattern: Option<String>,
    callback: WatchCallback,
    hashes: HashMap<PathBuf, blake3::Hash>,
}

impl Registration {
    fn covers(&self, path: &Path) -> bool {
        if !path.starts_with(&self.root) {
            return false;
        }
        match &self.pattern {
            Some(pattern) => {
                path.parent() == Some(self.root.as_path())
                    && path.file_name().and_then(|name| name.to_str()).is_some_and(|name| wildcard_match(pattern, name))
            }
            None => true,
        }
    }

    /// Keeps only paths whose contents changed since the last time they were seen.
    fn retain_changed(&mut self, paths: Vec<PathBuf>) -> Vec<PathBuf> {
        let mut changed = Vec::new();
        for path in paths {
            if path.is_dir() {
                continue;
            }
            match fs::read(&path) {
                Ok(bytes) => {
                    let hash = blake3::hash(&bytes);
                    if self.hashes.insert(path.clone(), hash) != Some(hash) {
                        changed.push(path);
                    }
                }
                Err(_) => {
                    if self.hashes.remove(&path).is_some() {
                        changed.push(path);
                    }
                }
            }
        }
        changed
    }
}

pub struct FileWatchService {
    watcher: Option<PollWatcher>,
    rx: Receiver<notify::Result<Event>>,
    registrations: Vec<Registration>,
    next_id: u64,
    poll_interval: Duration,
}

impl FileWatchService {
    pub fn new(poll_interval: Duration) -> Result<Self, WatchError> {
        let (tx, rx) = channel();
        let watcher = PollWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
            // notify compares mtime in whole seconds
            NotifyConfig::default().with_poll_interval(poll_interval).with_compare_contents(true),
        )?;
        log::debug!("[watch] polling every {} ms", poll_interval.as_millis());
        Ok(Self { watcher: Some(watcher), rx, registrations: Vec::new(), next_id: 0, poll_interval })
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    pub fn watch_count(&self) -> usize {
        self.registrations.len()
    }

    /// Watches a file, a directory (recursively) or a `dir/*.ext` style wildcard. `callback` receives
    /// the changed paths the next time [`poll`](Self::poll) runs.
    pub fn watch(
        &mut self,
        path: impl AsRef<Path>,
        callback: impl FnMut(&[PathBuf]) + 'static,
    ) -> Result<WatchId, WatchError> {
        self.register(path.as_ref(), Box::new(callback), false)
    }

    /// Like [`watch`](Self::watch), but runs `callback` once right away with every file currently
    /// in scope, so a single call both loads and hot-reloads an asset.
    pub fn watch_and_load(
        &mut self,
        path: impl AsRef<Path>,
        callback: impl FnMut(&[PathBuf]) + 'static,
    ) -> Result<WatchId, WatchError> {
        self.register(path.as_ref(), Box::new(callback), true)
    }

    fn register(&mut self, path: &Path, callback: WatchCallback, load_now: bool) -> Result<WatchId, WatchError> {
        let watcher = self.watcher.as_mut().ok_or(WatchError::ShutDown)?;
        let (root, pattern) = resolve_watch_target(path)?;
        let already_watched = self.registrations.iter().any(|existing| existing.root == root);
        if !already_watched {
            let mode = if root.is_dir() { RecursiveMode::Recursive } else { RecursiveMode::NonRecursive };
            watcher.watch(&root, mode)?;
        }

        let id = WatchId(self.next_id);
        self.next_id += 1;
        let mut registration = Registration { id, root, pattern, callback, hashes: HashMap::new() };
        let mut files = files_in_scope(&registration);
        files.sort();
        for file in &files {
            if let Ok(bytes) = fs::read(file) {
                registration.hashes.insert(file.clone(), blake3::hash(&bytes));
            }
        }
        log::info!("[watch] watching {} ({} file(s))", path.display(), registration.hashes.len());
        if load_now && !files.is_empty() {
            (registration.callback)(&files);
        }
        self.registrations.push(registration);
        Ok(id)
    }

    /// Runs the callback of every registration covering `path` as if the file had changed,
    /// whether or not its contents did. Returns how many callbacks ran.
    pub fn touch(&mut self, path: impl AsRef<Path>) -> Result<usize, WatchError> {
        if self.watcher.is_none() {
            return Err(WatchError::ShutDown);
        }
        let path = path.as_ref();
        if !path.is_file() {
            return Err(WatchError::PathNotFound(path.to_path_buf()));
        }
        let path = normalize_watch_path(path);
        let bytes = fs::read(&path).ok();
        let mut fired = 0;
        for registration in self.registrations.iter_mut().filter(|registration| registration.covers(&path)) {
            if let Some(bytes) = &bytes {
                registration.hashes.insert(path.clone(), blake3::hash(bytes));
            }
            (registration.callback)(std::slice::from_ref(&path));
            fired += 1;
        }
        log::debug!("[watch] touched {} ({fired} callback(s))", path.display());
        Ok(fired)
    }

    pub fn unwatch(&mut self, id: WatchId) -> bool {
        let Some(index) = self.registrations.iter().position(|registration| registration.id == id) else {
            return false;
        };
        let removed = self.registrations.remove(index);
        let still_used = self.registrations.iter().any(|registration| registration.root == removed.root);
        if !still_used {
            if let Some(watcher) = self.watcher.as_mut() {
                if let Err(err) = watcher.unwatch(&removed.root) {
                    log::warn!("[watch] failed to unwatch {}: {err}", removed.root.display());
                }
            }
        }
        true
    }

    pub fn unwatch_all(&mut self) {
        let ids: Vec<WatchId> = self.registrations.iter().map(|registration| registration.id).collect();
        for id in ids {
            self.unwatch(id);
        }
    }

    /// Drains pending events and runs the callbacks of every registration whose files changed.
    /// Returns how many callbacks ran.
    pub fn poll(&mut self) -> usize {
        if self.watcher.is_none() {
            return 0;
        }
        let mut touched: Vec<PathBuf> = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            match event {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
                        continue;
                    }
                    for path in event.paths {
                        if !touched.contains(&path) {
                            touched.push(path);
                        }
                    }
                }
                Err(err) => log::warn!("[watch] watcher error: {err}"),
            }
        }
        if touched.is_empty() {
            return 0;
        }

        let mut fired = 0;
        for registration in &mut self.registrations {
            let candidates: Vec<PathBuf> = touched.iter().filter(|path| registration.covers(path)).cloned().collect();
            let changed = registration.retain_changed(candidates);
            if changed.is_empty() {
                continue;
            }
            log::debug!("[watch] {} changed file(s) under {}", changed.len(), registration.root.display());
            (registration.callback)(&changed);
            fired += 1;
        }
        fired
    }

    /// Stops the polling thread and drops every registration. Later `watch` calls fail.
    pub fn shutdown(&mut self) {
        if self.watcher.take().is_some() {
            self.registrations.clear();
            log::info!("[watch] file watch service stopped");
        }
    }
}

impl Drop for FileWatchService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn resolve_watch_target(path: &Path) -> Result<(PathBuf, Option<String>), WatchError> {
    let file_name = path.file_name().and_then(|name| name.to_str()).unwrap_or_default();
    if file_name.contains('*') {
        let parent = path.parent().filter(|parent| !parent.as_os_str().is_empty()).unwrap_or(Path::new("."));
        if !parent.is_dir() {
            return Err(WatchError::PathNotFound(parent.to_path_buf()));
        }
        let root = normalize_watch_path(parent);
        let pattern = file_name.to_string();
        let any_match = fs::read_dir(&root)
            .map(|entries| {
                entries.filter_map(|entry| entry.ok()).any(|entry| {
                    entry.path().is_file() && entry.file_name().to_str().is_some_and(|name| wildcard_match(&pattern, name))
                })
            })
            .unwrap_or(false);
        if !any_match {
            return Err(WatchError::NoWildcardMatch(path.to_path_buf()));
        }
        return Ok((root, Some(pattern)));
    }
    if !path.exists() {
        return Err(WatchError::PathNotFound(path.to_path_buf()));
    }
    Ok((normalize_watch_path(path), None))
}

fn files_in_scope(registration: &Registration) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![registration.root.clone()];
    while let Some(path) = pending.pop() {
        if path.is_file() {
            if registration.covers(&path) {
                files.push(path);
            }
            continue;
        }
        if let Ok(entries) = fs::read_dir(&path) {
            for entry in entries.filter_map(|entry| entry.ok()) {
                let child = entry.path();
                if child.is_dir() && registration.pattern.is_some() {
                    continue;
                }
                pending.push(child);
            }
        }
    }
    files
}

/// `*` matches any run of characters; everything else matches literally.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = name.strip_prefix(first) else {
        return false;
    };
    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(index) => rest = &rest[index + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

fn normalize_watch_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else if let Ok(cwd) = env::current_dir() {
        cwd.join(path)
    } else {
        path.to_path_buf()
    };
    fs::canonicalize(&absolute).unwrap_or(absolute)
}
