//! ThreadManager: owns the collection of threads and the scheduler that
//! runs one cooperative task per active invocation. One task is spawned
//! per invocation; the subprocess itself is spawned, timeout-bounded, and
//! killed on cancellation or drop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

use crate::error::HarloweError;
use crate::merge_coordinator::{MergeCoordinator, QueueOutcome, ThreadSink};
use crate::model::{Role, Thread, ThreadId, ThreadStatus};
use crate::version_store::VersionStore;
use crate::workspace::Workspace;

/// 300-second ceiling on any one assistant subprocess.
const SUBPROCESS_TIMEOUT: Duration = Duration::from_secs(300);
/// Bounded wait for a prior in-flight task before forcibly cancelling it.
const PRIOR_TASK_WAIT: Duration = Duration::from_secs(10);
/// Graceful-termination grace period before a forced kill.
const GRACEFUL_KILL_WAIT: Duration = Duration::from_secs(5);

/// Host-installed callback, invoked with the mutated thread after every
/// state-visible change. A callback that panics is caught and logged,
/// never propagated into the scheduler.
pub type UpdateCallback = Arc<dyn Fn(&Thread) + Send + Sync>;

/// Fixed configuration for spawning the assistant subprocess.
#[derive(Clone, Debug)]
pub struct AssistantConfig {
    /// Path to the configured assistant executable.
    pub executable: PathBuf,
    /// Per-invocation timeout override; defaults to 300 s if `None`.
    pub timeout: Option<Duration>,
}

struct TrackedTask {
    handle: JoinHandle<()>,
}

/// Await `handle` up to `bound`; if it does not finish in time, abort it and
/// await the abort. Aborting drops the task's future — including any
/// subprocess `Child` owned across its last await point — and since every
/// subprocess this manager spawns is built with `.kill_on_drop(true)`, that
/// drop forcibly terminates it. This is the portable stand-in for the
/// graceful-SIGTERM-then-SIGKILL sequence a Unix-signal crate would give us;
/// tokio's `Child` exposes only a single forcible-kill primitive.
async fn await_with_bound(mut handle: JoinHandle<()>, bound: Duration) {
    if tokio::time::timeout(bound, &mut handle).await.is_err() {
        handle.abort();
        let _ = handle.await;
    }
}

/// Owns the thread table and the one-task-per-active-invocation scheduler.
pub struct ThreadManager {
    threads: Mutex<HashMap<ThreadId, Thread>>,
    tasks: Mutex<HashMap<ThreadId, TrackedTask>>,
    merge_coordinator: Arc<MergeCoordinator>,
    version_store: Arc<VersionStore>,
    document_path: PathBuf,
    reference_files: Vec<PathBuf>,
    workspaces_root: PathBuf,
    assistant: AssistantConfig,
    global_cap: Option<Arc<Semaphore>>,
    update_callback: Option<UpdateCallback>,
    self_ref: Mutex<Option<Weak<Self>>>,
}

impl ThreadManager {
    /// Construct a manager. Returns an `Arc` because invocation tasks need a
    /// strong self-reference to outlive the caller, and [`MergeCoordinator`]
    /// needs a [`Weak`] back-reference installed via [`Self::attach_to_coordinator`].
    #[must_use]
    pub fn new(
        merge_coordinator: Arc<MergeCoordinator>,
        version_store: Arc<VersionStore>,
        document_path: PathBuf,
        reference_files: Vec<PathBuf>,
        workspaces_root: PathBuf,
        assistant: AssistantConfig,
        max_concurrent: Option<usize>,
        update_callback: Option<UpdateCallback>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            threads: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            merge_coordinator,
            version_store,
            document_path,
            reference_files,
            workspaces_root,
            assistant,
            global_cap: max_concurrent.map(|n| Arc::new(Semaphore::new(n.max(1)))),
            update_callback,
            self_ref: Mutex::new(None),
        });
        manager
    }

    /// Attach this manager's own [`Weak`] handle, and install that handle on
    /// `self.merge_coordinator` as its [`ThreadSink`]. Must be called once,
    /// right after construction, with the same `Arc` returned by [`Self::new`].
    pub async fn attach_to_coordinator(self: &Arc<Self>) {
        *self.self_ref.lock().await = Some(Arc::downgrade(self));
        let sink: Weak<dyn ThreadSink> = Arc::downgrade(self) as Weak<dyn ThreadSink>;
        self.merge_coordinator.attach_sink(sink).await;
    }

    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }

    async fn fire_callback(&self, thread_id: ThreadId) {
        let Some(callback) = &self.update_callback else { return };
        let threads = self.threads.lock().await;
        if let Some(thread) = threads.get(&thread_id) {
            let thread = thread.clone();
            drop(threads);
            // The callback is host code; guard against it panicking so a
            // misbehaving UI layer cannot take down the scheduler.
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(&thread))).is_err() {
                error!(%thread_id, "update callback panicked; suppressed");
            }
        }
    }

    /// Construct a `Thread` in PENDING, register it, and spawn its task.
    /// Non-blocking: returns as soon as the task is scheduled.
    pub async fn create_thread(self: &Arc<Self>, selected_text: String, initial_request: String, line_range: (u32, u32)) -> ThreadId {
        let now = Self::now();
        let thread = Thread::new(selected_text, initial_request, line_range, now);
        let id = thread.id;
        self.threads.lock().await.insert(id, thread);
        self.spawn_invocation(id, None).await;
        id
    }

    /// Await any in-flight task for `thread_id` (bounded 10 s, then
    /// forcibly cancelled); append a user message with
    /// `awaiting_response=true`; spawn a follow-up task.
    ///
    /// # Errors
    /// Returns [`HarloweError`]-shaped failure text if `thread_id` is
    /// unknown or the thread is FAILED (terminal).
    pub async fn send_message(self: &Arc<Self>, thread_id: ThreadId, content: String) -> Result<(), String> {
        {
            let threads = self.threads.lock().await;
            let Some(thread) = threads.get(&thread_id) else {
                return Err(format!("no such thread: {thread_id}"));
            };
            if thread.status == ThreadStatus::Failed {
                return Err(format!("thread {thread_id} is FAILED and cannot accept new messages"));
            }
        }

        if let Some(tracked) = self.tasks.lock().await.remove(&thread_id) {
            await_with_bound(tracked.handle, PRIOR_TASK_WAIT).await;
        }

        let now = Self::now();
        let message_id = {
            let mut threads = self.threads.lock().await;
            let thread = threads.get_mut(&thread_id).ok_or_else(|| format!("no such thread: {thread_id}"))?;
            if thread.status == ThreadStatus::Completed {
                thread.status = ThreadStatus::Pending;
            }
            thread.awaiting_response = true;
            thread.append_message(Role::User, content, false, now)
        };
        self.fire_callback(thread_id).await;

        self.spawn_invocation(thread_id, Some(message_id)).await;
        Ok(())
    }

    /// Send termination to the subprocess, await up to 5 s for teardown,
    /// then cancel the task and await it. Idempotent — a thread with no
    /// in-flight task is a no-op.
    pub async fn cancel(&self, thread_id: ThreadId) {
        let Some(tracked) = self.tasks.lock().await.remove(&thread_id) else {
            return;
        };
        tracked.handle.abort();
        let _ = tokio::time::timeout(GRACEFUL_KILL_WAIT, tracked.handle).await;
    }

    /// Pure status transition: mark a thread COMPLETED.
    ///
    /// # Errors
    /// Returns an error string if `thread_id` is unknown.
    pub async fn close(&self, thread_id: ThreadId) -> Result<(), String> {
        let mut threads = self.threads.lock().await;
        let thread = threads.get_mut(&thread_id).ok_or_else(|| format!("no such thread: {thread_id}"))?;
        thread.status = ThreadStatus::Completed;
        thread.updated_at = Self::now();
        drop(threads);
        self.fire_callback(thread_id).await;
        Ok(())
    }

    /// Pure status transition: reopen a COMPLETED thread to ACTIVE.
    ///
    /// # Errors
    /// Returns an error if `thread_id` is unknown or not currently COMPLETED.
    pub async fn reopen(&self, thread_id: ThreadId) -> Result<(), String> {
        let mut threads = self.threads.lock().await;
        let thread = threads.get_mut(&thread_id).ok_or_else(|| format!("no such thread: {thread_id}"))?;
        if thread.status != ThreadStatus::Completed {
            return Err(format!("thread {thread_id} is not COMPLETED; cannot reopen"));
        }
        thread.status = ThreadStatus::Active;
        thread.updated_at = Self::now();
        drop(threads);
        self.fire_callback(thread_id).await;
        Ok(())
    }

    /// Every thread touching line `line` (document-scoped threads, whose
    /// `line_range` is `(0, 0)`, are never matched).
    pub async fn threads_for_line(&self, line: u32) -> Vec<Thread> {
        self.threads
            .lock()
            .await
            .values()
            .filter(|t| t.line_range != (0, 0) && t.line_range.0 <= line && line <= t.line_range.1)
            .cloned()
            .collect()
    }

    /// Every thread currently PENDING or ACTIVE.
    pub async fn active_threads(&self) -> Vec<Thread> {
        self.threads
            .lock()
            .await
            .values()
            .filter(|t| matches!(t.status, ThreadStatus::Pending | ThreadStatus::Active))
            .cloned()
            .collect()
    }

    /// Count of currently PENDING or ACTIVE threads.
    pub async fn active_count(&self) -> usize {
        self.threads
            .lock()
            .await
            .values()
            .filter(|t| matches!(t.status, ThreadStatus::Pending | ThreadStatus::Active))
            .count()
    }

    /// Snapshot a thread by id.
    pub async fn get(&self, thread_id: ThreadId) -> Option<Thread> {
        self.threads.lock().await.get(&thread_id).cloned()
    }

    /// Snapshot every tracked thread, regardless of status.
    pub async fn all_threads(&self) -> Vec<Thread> {
        self.threads.lock().await.values().cloned().collect()
    }

    /// Register a thread this manager did not itself create — e.g. one
    /// restored from a host's persisted JSON via
    /// [`crate::model::Thread::from_serializable`]. No task is spawned;
    /// the thread is simply added to the table so later lookups
    /// (`get`, `threads_for_line`, [`Self::mutate_thread`]) see it.
    pub async fn register_thread(&self, thread: Thread) {
        let id = thread.id;
        self.threads.lock().await.insert(id, thread);
    }

    /// Apply `f` to the tracked thread `thread_id` under the table lock,
    /// then fire the update callback. Returns `false` if no such thread is
    /// tracked. This is the mutation path [`crate::undo_engine::UndoEngine`]
    /// uses to record revert/redo metadata, mirroring how
    /// [`MergeCoordinator`] mutates a thread while the gate is held: the
    /// thread table's lock is every thread's single logical lock.
    pub async fn mutate_thread<F>(&self, thread_id: ThreadId, f: F) -> bool
    where
        F: FnOnce(&mut Thread),
    {
        {
            let mut threads = self.threads.lock().await;
            let Some(thread) = threads.get_mut(&thread_id) else {
                return false;
            };
            f(thread);
        }
        self.fire_callback(thread_id).await;
        true
    }

    /// Await every currently-tracked task to completion (does not cancel
    /// them), draining the task table as each finishes.
    pub async fn wait_for_all(&self) {
        let handles: Vec<_> = {
            let mut tasks = self.tasks.lock().await;
            tasks.drain().map(|(_, t)| t.handle).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Snapshot current subprocesses and tasks; terminate all processes
    /// (graceful then forced); cancel all tasks and await them; clear
    /// tracking tables. Never panics on already-dead processes or
    /// already-cancelled tasks.
    pub async fn shutdown(&self) {
        let tracked: Vec<_> = self.tasks.lock().await.drain().map(|(_, t)| t.handle).collect();
        for handle in &tracked {
            handle.abort();
        }
        for handle in tracked {
            let _ = tokio::time::timeout(GRACEFUL_KILL_WAIT, handle).await;
        }
    }

    async fn spawn_invocation(self: &Arc<Self>, thread_id: ThreadId, message_id: Option<crate::model::MessageId>) {
        let manager = Arc::clone(self);

        let handle = tokio::spawn(async move {
            manager.run_invocation(thread_id, message_id).await;
        });

        self.tasks.lock().await.insert(thread_id, TrackedTask { handle });
    }

    /// The per-invocation procedure: acquire a workspace, spawn the
    /// assistant, capture its output, diff the workspace, then queue the
    /// diff for merging and release the workspace.
    async fn run_invocation(
        self: Arc<Self>,
        thread_id: ThreadId,
        follow_up_message_id: Option<crate::model::MessageId>,
    ) {
        let _permit = match &self.global_cap {
            Some(sem) => Some(Arc::clone(sem).acquire_owned().await),
            None => None,
        };

        {
            let mut threads = self.threads.lock().await;
            if let Some(thread) = threads.get_mut(&thread_id) {
                thread.status = ThreadStatus::Active;
            }
        }
        self.fire_callback(thread_id).await;

        let invocation_message_id = crate::model::MessageId::random();
        let mut workspace = match Workspace::acquire(
            &self.workspaces_root,
            thread_id,
            invocation_message_id,
            &self.document_path,
            &self.reference_files,
        )
        .await
        {
            Ok(ws) => ws,
            Err(e) => {
                error!(%thread_id, error = %e, "workspace acquisition failed");
                self.fail_thread(thread_id, &e.to_string()).await;
                return;
            }
        };

        let prompt = {
            let threads = self.threads.lock().await;
            threads.get(&thread_id).map(|t| build_prompt(t, &workspace, follow_up_message_id.is_none()))
        };
        let Some(prompt) = prompt else {
            return;
        };

        let timeout = self.assistant.timeout.unwrap_or(SUBPROCESS_TIMEOUT);
        let spawn_result = Command::new(&self.assistant.executable)
            .current_dir(&workspace.workspace_dir)
            .arg("--allowed-root")
            .arg(&workspace.workspace_dir)
            .args(["--allow-tool", "Read"])
            .args(["--allow-tool", "Edit"])
            .args(["--allow-tool", "Write"])
            .args(["--allow-tool", "Grep"])
            .args(["--allow-tool", "Glob"])
            .arg("--prompt")
            .arg(&prompt)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match spawn_result {
            Ok(child) => child,
            Err(e) => {
                error!(%thread_id, error = %e, "failed to spawn assistant subprocess");
                workspace.preserve_for_debugging();
                self.fail_thread(thread_id, &HarloweError::SpawnFailed {
                    executable: self.assistant.executable.clone(),
                    detail: e.to_string(),
                }.to_string()).await;
                return;
            }
        };

        // If the timeout elapses, this future (and the `child` it owns) is
        // dropped mid-poll; `kill_on_drop(true)` above ensures that forcibly
        // terminates the subprocess rather than leaking it.
        let response_text = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
                if stdout.is_empty() {
                    String::from_utf8_lossy(&output.stderr).trim().to_owned()
                } else {
                    stdout
                }
            }
            Ok(Err(e)) => {
                error!(%thread_id, error = %e, "assistant subprocess I/O error");
                workspace.preserve_for_debugging();
                self.fail_thread(thread_id, &e.to_string()).await;
                return;
            }
            Err(_elapsed) => {
                // A timeout degrades the response rather than failing the
                // thread: it remains ACTIVE so a follow-up message can retry.
                warn!(%thread_id, "assistant subprocess exceeded the timeout ceiling");
                let canned = format!("assistant took too long ({}s ceiling) and was stopped", timeout.as_secs());
                self.post_status(thread_id, &canned, true).await;
                canned
            }
        };

        let now = Self::now();
        {
            let mut threads = self.threads.lock().await;
            if let Some(thread) = threads.get_mut(&thread_id) {
                if follow_up_message_id.is_none() {
                    // Initial invocation: the user's opening request is
                    // already `initial_request`; still append it as the
                    // first transcript turn.
                    thread.append_message(Role::User, thread.initial_request.clone(), false, now);
                }
                thread.append_message(Role::Assistant, response_text, false, now);
                thread.awaiting_response = false;
            }
        }
        self.fire_callback(thread_id).await;

        let diff = workspace.diff(thread_id, invocation_message_id, now).await;
        if diff.has_changes() {
            let mut threads = self.threads.lock().await;
            if let Some(thread) = threads.get_mut(&thread_id) {
                let outcome = self.merge_coordinator.queue_merge(thread, diff).await;
                trace!(%thread_id, ?outcome, "merge coordinator outcome");
            }
        }
    }

    async fn fail_thread(&self, thread_id: ThreadId, detail: &str) {
        {
            let mut threads = self.threads.lock().await;
            if let Some(thread) = threads.get_mut(&thread_id) {
                thread.status = ThreadStatus::Failed;
                thread.updated_at = Self::now();
            }
        }
        self.post_status(thread_id, detail, true).await;
        self.fire_callback(thread_id).await;
    }
}

#[async_trait]
impl ThreadSink for ThreadManager {
    async fn post_status(&self, thread_id: ThreadId, text: &str, is_error: bool) {
        let prefix = if is_error { "[Harlowe]: \u{26a0}\u{fe0f} " } else { "[Harlowe]: " };
        let content = format!("{prefix}{text} \u{1f916}");
        let now = Self::now();
        {
            let mut threads = self.threads.lock().await;
            if let Some(thread) = threads.get_mut(&thread_id) {
                thread.append_message(Role::System, content, true, now);
            } else {
                warn!(%thread_id, "post_status for unknown thread");
                return;
            }
        }
        self.fire_callback(thread_id).await;
    }

    async fn spawn_resolution_thread(&self, initial_request: String, peers: Vec<ThreadId>) -> ThreadId {
        let now = Self::now();
        let mut thread = Thread::new_system(initial_request, now);
        for (i, peer) in peers.iter().enumerate() {
            thread
                .metadata
                .insert(format!("conflict_peer_{i}"), crate::model::MetadataValue::Text(peer.to_string()));
        }
        let id = thread.id;
        self.threads.lock().await.insert(id, thread);
        self.fire_callback(id).await;
        id
    }
}

/// Build the prompt text: the initial-request form, or the follow-up form
/// that replays the conversation transcript so far.
fn build_prompt(thread: &Thread, workspace: &Workspace, is_initial: bool) -> String {
    let mut prompt = String::new();

    for reference in &workspace.reference_files {
        let name = reference.file_name().map_or_else(|| "reference".to_owned(), |n| n.to_string_lossy().into_owned());
        prompt.push_str(&format!("--- {name} ---\n"));
        if let Ok(content) = std::fs::read_to_string(reference) {
            prompt.push_str(&content);
            if !content.ends_with('\n') {
                prompt.push('\n');
            }
        }
        prompt.push_str("--- End of reference ---\n\n");
    }

    let workspace_filename = workspace
        .workspace_file
        .file_name()
        .map_or_else(|| "document".to_owned(), |n| n.to_string_lossy().into_owned());

    if is_initial {
        prompt.push_str(&format!(
            "You are editing '{workspace_filename}'. Selected lines {}-{}.\n\n",
            thread.line_range.0, thread.line_range.1
        ));
        prompt.push_str(&format!("Request: {}\n\n", thread.initial_request));
        prompt.push_str("Available tools: Read, Edit, Write, Grep, Glob.\n");
    } else {
        prompt.push_str(&format!(
            "Selection (lines {}-{}):\n{}\n\n",
            thread.line_range.0, thread.line_range.1, thread.selected_text
        ));
        prompt.push_str("CONVERSATION HISTORY:\n");
        for message in &thread.messages {
            if message.is_system_flag {
                continue;
            }
            let speaker = match message.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::System => continue,
            };
            prompt.push_str(&format!("{speaker}: {}\n", message.content));
        }
        prompt.push_str("Assistant:");
    }

    prompt
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn assistant_config(executable: PathBuf) -> AssistantConfig {
        AssistantConfig {
            executable,
            timeout: Some(Duration::from_secs(5)),
        }
    }

    async fn manager_with_echo(doc_dir: &TempDir) -> (Arc<ThreadManager>, PathBuf) {
        let doc = doc_dir.path().join("doc.md");
        std::fs::write(&doc, "a\nb\nc\n").unwrap();
        let store = Arc::new(VersionStore::open(&doc).await);
        let coordinator = Arc::new(MergeCoordinator::new(Arc::clone(&store), doc.clone()));
        let workspaces_root = doc_dir.path().join("workspaces");
        std::fs::create_dir_all(&workspaces_root).unwrap();

        // `/bin/echo` stands in for the assistant executable: it ignores
        // all the allow-tool/prompt flags and just prints them, which is
        // enough to exercise spawn/timeout/response-capture without a real
        // assistant binary.
        let manager = ThreadManager::new(
            coordinator,
            store,
            doc.clone(),
            Vec::new(),
            workspaces_root,
            assistant_config(PathBuf::from("/bin/echo")),
            None,
            None,
        );
        manager.attach_to_coordinator().await;
        (manager, doc)
    }

    #[tokio::test]
    async fn create_thread_runs_to_non_pending_status() {
        let dir = TempDir::new().unwrap();
        let (manager, _doc) = manager_with_echo(&dir).await;

        let id = manager.create_thread("sel".to_owned(), "do something".to_owned(), (1, 1)).await;
        manager.wait_for_all().await;

        let thread = manager.get(id).await.unwrap();
        assert_ne!(thread.status, ThreadStatus::Pending);
        assert!(!thread.messages.is_empty());
    }

    #[tokio::test]
    async fn send_message_to_unknown_thread_errors() {
        let dir = TempDir::new().unwrap();
        let (manager, _doc) = manager_with_echo(&dir).await;
        let result = manager.send_message(ThreadId::random(), "hi".to_owned()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn close_then_reopen_transitions() {
        let dir = TempDir::new().unwrap();
        let (manager, _doc) = manager_with_echo(&dir).await;
        let id = manager.create_thread(String::new(), "req".to_owned(), (0, 0)).await;
        manager.wait_for_all().await;

        manager.close(id).await.unwrap();
        assert_eq!(manager.get(id).await.unwrap().status, ThreadStatus::Completed);

        manager.reopen(id).await.unwrap();
        assert_eq!(manager.get(id).await.unwrap().status, ThreadStatus::Active);
    }

    #[tokio::test]
    async fn reopen_non_completed_thread_fails() {
        let dir = TempDir::new().unwrap();
        let (manager, _doc) = manager_with_echo(&dir).await;
        let id = manager.create_thread(String::new(), "req".to_owned(), (0, 0)).await;
        manager.wait_for_all().await;
        assert!(manager.reopen(id).await.is_err());
    }

    #[tokio::test]
    async fn threads_for_line_matches_range() {
        let dir = TempDir::new().unwrap();
        let (manager, _doc) = manager_with_echo(&dir).await;
        let id = manager.create_thread("sel".to_owned(), "req".to_owned(), (5, 10)).await;
        manager.wait_for_all().await;

        let matches = manager.threads_for_line(7).await;
        assert!(matches.iter().any(|t| t.id == id));
        assert!(manager.threads_for_line(100).await.is_empty());
    }

    #[tokio::test]
    async fn post_status_wraps_in_harlowe_prefix() {
        let dir = TempDir::new().unwrap();
        let (manager, _doc) = manager_with_echo(&dir).await;
        let id = manager.create_thread(String::new(), "req".to_owned(), (0, 0)).await;
        manager.wait_for_all().await;

        ThreadSink::post_status(manager.as_ref(), id, "all good", false).await;
        let thread = manager.get(id).await.unwrap();
        let last = thread.messages.last().unwrap();
        assert!(last.content.starts_with("[Harlowe]: all good"));
    }

    #[tokio::test]
    async fn spawn_resolution_thread_is_system_owned() {
        let dir = TempDir::new().unwrap();
        let (manager, _doc) = manager_with_echo(&dir).await;
        let peer = ThreadId::random();
        let id = ThreadSink::spawn_resolution_thread(manager.as_ref(), "conflict!".to_owned(), vec![peer]).await;
        let thread = manager.get(id).await.unwrap();
        assert!(thread.is_system_thread());
    }
}
