//! Soft-gate background checks after a successful write.
//!
//! A `write_file`/`apply_patch` that lands successfully triggers a
//! syntax-or-lint check chosen by file extension. The check runs as a
//! detached background task via the session's [`InterruptQueue`] so the
//! turn that just wrote the file never waits on it; a failure surfaces as
//! a `LINT_FAIL` interrupt the next turn injects as a synthesized message.
//! Missing tool binaries (no `node`, no `python3`, no `eslint` on `PATH`)
//! degrade to a silent skip rather than an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::config::Config;
use crate::event_bus::{AgentEvent, EventBus};
use crate::session::model::Interrupt;
use crate::session::store::SessionStore;

/// Default extension → shell command template, used when `review.tools`
/// in config doesn't override it. `{file}` is substituted with the
/// absolute path of the file that was just written.
fn default_template(ext: &str) -> Option<&'static str> {
    match ext {
        "js" | "mjs" | "cjs" => Some("node --check {file}"),
        "py" => Some("python3 -m py_compile {file}"),
        _ => None,
    }
}

fn eslint_config_present(workspace: &Path) -> bool {
    const CANDIDATES: &[&str] = &[
        ".eslintrc",
        ".eslintrc.js",
        ".eslintrc.cjs",
        ".eslintrc.json",
        ".eslintrc.yml",
        ".eslintrc.yaml",
        "eslint.config.js",
        "eslint.config.mjs",
        "eslint.config.cjs",
    ];
    CANDIDATES.iter().any(|name| workspace.join(name).is_file())
}

/// Subscribes to `ToolResult` events and enqueues background checks onto
/// the session's `InterruptQueue`.
pub struct AsyncCheckSubscriber {
    config: Arc<Config>,
    sessions: Arc<SessionStore>,
    workspaces: Mutex<HashMap<Uuid, PathBuf>>,
}

impl AsyncCheckSubscriber {
    pub fn new(config: Arc<Config>, sessions: Arc<SessionStore>) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions,
            workspaces: Mutex::new(HashMap::new()),
        })
    }

    pub fn attach(self: &Arc<Self>, bus: &EventBus) {
        let this = self.clone();
        bus.subscribe(move |event| this.handle(event));
    }

    fn handle(&self, event: &AgentEvent) {
        match event {
            AgentEvent::Start { session_id, workspace, .. } => {
                self.workspaces
                    .lock()
                    .unwrap()
                    .insert(*session_id, PathBuf::from(workspace));
            }
            AgentEvent::SessionResume { session_id, workspace, .. } => {
                self.workspaces
                    .lock()
                    .unwrap()
                    .insert(*session_id, PathBuf::from(workspace));
            }
            AgentEvent::SessionEnd { session_id } => {
                self.workspaces.lock().unwrap().remove(session_id);
            }
            AgentEvent::ToolResult { session_id, tool, ok, path, .. } => {
                if !self.config.review.enabled {
                    return;
                }
                if !*ok || (tool != "write_file" && tool != "apply_patch") {
                    return;
                }
                let Some(path) = path else { return };
                self.spawn_check(*session_id, path.clone());
            }
            _ => {}
        }
    }

    fn spawn_check(&self, session_id: Uuid, relative_path: String) {
        let Some(workspace) = self.workspaces.lock().unwrap().get(&session_id).cloned() else {
            return;
        };
        let Some(ext) = Path::new(&relative_path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
        else {
            return;
        };

        let absolute = workspace.join(&relative_path);
        let mut checks: Vec<String> = Vec::new();

        let template = self
            .config
            .review
            .tools
            .get(&ext)
            .map(|s| s.as_str())
            .or_else(|| default_template(&ext));
        if let Some(template) = template {
            checks.push(template.replace("{file}", &absolute.to_string_lossy()));
        }

        if self.config.runtime.checks.eslint.enabled
            && matches!(ext.as_str(), "ts" | "tsx" | "js" | "jsx")
            && eslint_config_present(&workspace)
        {
            checks.push(format!("eslint {}", absolute.to_string_lossy()));
        }

        if checks.is_empty() {
            return;
        }

        let Some(session) = self.sessions.get(session_id) else { return };
        for (i, command) in checks.into_iter().enumerate() {
            let linter = command.split_whitespace().next().unwrap_or("check").to_string();
            let file = relative_path.clone();
            let session = session.clone();
            session_enqueue(&session, async move {
                let outcome = run_check(&command).await;
                match outcome {
                    CheckOutcome::Skip => Err(()),
                    CheckOutcome::Passed => Err(()),
                    CheckOutcome::Failed(output) => Ok(Interrupt {
                        kind: "LINT_FAIL".to_string(),
                        detail: format!(
                            "LINT_FAIL {{\"file\":{:?},\"linter\":{:?},\"output\":{:?}}}",
                            file, linter, output
                        ),
                    }),
                }
            });
            let _ = i;
        }
    }
}

enum CheckOutcome {
    Passed,
    Failed(String),
    Skip,
}

async fn run_check(command: &str) -> CheckOutcome {
    let binary = match command.split_whitespace().next() {
        Some(b) => b,
        None => return CheckOutcome::Skip,
    };
    if which::which(binary).is_err() {
        return CheckOutcome::Skip;
    }

    let output = tokio::process::Command::new("sh").arg("-c").arg(command).output().await;
    match output {
        Ok(result) if result.status.success() => CheckOutcome::Passed,
        Ok(result) => {
            let mut text = String::from_utf8_lossy(&result.stderr).into_owned();
            if text.trim().is_empty() {
                text = String::from_utf8_lossy(&result.stdout).into_owned();
            }
            CheckOutcome::Failed(text.trim().to_string())
        }
        Err(_) => CheckOutcome::Skip,
    }
}

/// Enqueue `fut` onto the live session's interrupt queue without holding
/// the session lock across the await — we only need it to reach in,
/// grab the queue handle isn't possible since `InterruptQueue` lives
/// inside the mutex-guarded `Session`, so the future itself re-acquires
/// the lock only to push the finished result.
fn session_enqueue(
    session: &crate::session::store::SharedSession,
    fut: impl std::future::Future<Output = Result<Interrupt, ()>> + Send + 'static,
) {
    let session = session.clone();
    tokio::spawn(async move {
        let result = fut.await;
        let guard = session.lock().await;
        guard.interrupts.enqueue(async move { result });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::providers::mock::MockProvider;
    use crate::session::model::Session;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn config(enabled: bool) -> Arc<Config> {
        Arc::new(Config { review: crate::config::ReviewConfig { enabled, tools: HashMap::new() }, ..Config::default() })
    }

    fn new_session(workspace: PathBuf) -> Session {
        Session::new(
            workspace,
            PathBuf::from("/tmp/log.jsonl"),
            Arc::new(MockProvider::new()),
            "mock".to_string(),
            8,
            20,
        )
    }

    #[tokio::test]
    async fn disabled_review_config_ignores_write_events() {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::new();
        let store = Arc::new(SessionStore::new());
        let subscriber = AsyncCheckSubscriber::new(config(false), store.clone());
        subscriber.attach(&bus);

        let session = new_session(dir.path().to_path_buf());
        let id = session.id;
        store.insert(session);

        bus.publish(AgentEvent::Start {
            session_id: id,
            workspace: dir.path().to_string_lossy().into_owned(),
            log_path: "/tmp/log.jsonl".to_string(),
            model: "mock".to_string(),
        });
        bus.publish(AgentEvent::ToolResult {
            session_id: id,
            tool: "write_file".to_string(),
            ok: true,
            output: "wrote".to_string(),
            path: Some("missing-binary.py".to_string()),
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let handle = store.get(id).unwrap();
        assert_eq!(handle.lock().await.interrupts.pending_count(), 0);
    }

    #[tokio::test]
    async fn unknown_extension_enqueues_nothing() {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::new();
        let store = Arc::new(SessionStore::new());
        let subscriber = AsyncCheckSubscriber::new(config(true), store.clone());
        subscriber.attach(&bus);

        let session = new_session(dir.path().to_path_buf());
        let id = session.id;
        store.insert(session);

        bus.publish(AgentEvent::Start {
            session_id: id,
            workspace: dir.path().to_string_lossy().into_owned(),
            log_path: "/tmp/log.jsonl".to_string(),
            model: "mock".to_string(),
        });
        bus.publish(AgentEvent::ToolResult {
            session_id: id,
            tool: "write_file".to_string(),
            ok: true,
            output: "wrote".to_string(),
            path: Some("README.md".to_string()),
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let handle = store.get(id).unwrap();
        assert_eq!(handle.lock().await.interrupts.pending_count(), 0);
    }
}
