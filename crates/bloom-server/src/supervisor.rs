//! Agent process supervisor
//!
//! Owns at most one running agent process, keyed by the session (chat) id it
//! was started for. Stopping sends SIGTERM and escalates to SIGKILL when the
//! process has not exited after the grace period.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::AgentConfig;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("agent already running for session {0}")]
    AlreadyRunning(String),

    #[error("agent is not running")]
    NotRunning,

    #[error("{0} env var not present")]
    MissingEnv(String),

    #[error("failed to spawn agent: {0}")]
    Spawn(#[source] io::Error),

    #[error("failed to stop agent: {0}")]
    Stop(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited within the grace period
    Terminated,
    /// Killed after the grace period
    Killed,
}

struct Running {
    session_id: String,
    child: Child,
}

pub struct ProcessSupervisor {
    config: AgentConfig,
    current: Mutex<Option<Running>>,
}

impl ProcessSupervisor {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            current: Mutex::new(None),
        }
    }

    /// Spawn the agent for `session_id`
    pub async fn start(&self, session_id: &str) -> Result<(), SupervisorError> {
        let mut current = self.current.lock().await;
        reap(&mut current);

        if let Some(running) = current.as_ref() {
            return Err(SupervisorError::AlreadyRunning(running.session_id.clone()));
        }

        if let Some(name) = self
            .config
            .required_env
            .iter()
            .find(|name| std::env::var_os(name.as_str()).is_none())
        {
            return Err(SupervisorError::MissingEnv(name.clone()));
        }

        let child = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg(&self.config.session_flag)
            .arg(session_id)
            .kill_on_drop(true)
            .spawn()
            .map_err(SupervisorError::Spawn)?;

        info!(pid = child.id(), session_id, program = %self.config.program, "Agent started");

        *current = Some(Running {
            session_id: session_id.to_string(),
            child,
        });

        Ok(())
    }

    /// Stop the running agent, forcefully if it outlives the grace period
    pub async fn stop(&self) -> Result<StopOutcome, SupervisorError> {
        let mut current = self.current.lock().await;
        reap(&mut current);

        let Some(mut running) = current.take() else {
            return Err(SupervisorError::NotRunning);
        };

        terminate(&mut running.child).map_err(SupervisorError::Stop)?;

        match tokio::time::timeout(self.config.grace_period, running.child.wait()).await {
            Ok(Ok(status)) => {
                info!(session_id = %running.session_id, %status, "Agent stopped");
                Ok(StopOutcome::Terminated)
            },
            Ok(Err(e)) => Err(SupervisorError::Stop(e)),
            Err(_) => {
                warn!(
                    session_id = %running.session_id,
                    grace_secs = self.config.grace_period.as_secs_f64(),
                    "Agent ignored termination, killing"
                );
                running.child.kill().await.map_err(SupervisorError::Stop)?;
                Ok(StopOutcome::Killed)
            },
        }
    }

    pub async fn is_running(&self) -> bool {
        let mut current = self.current.lock().await;
        reap(&mut current);
        current.is_some()
    }

    /// Session the running agent was started for
    pub async fn session_id(&self) -> Option<String> {
        let mut current = self.current.lock().await;
        reap(&mut current);
        current.as_ref().map(|r| r.session_id.clone())
    }

    pub fn grace_period(&self) -> Duration {
        self.config.grace_period
    }
}

/// Forget a child that has already exited
fn reap(current: &mut Option<Running>) {
    let Some(running) = current.as_mut() else {
        return;
    };

    match running.child.try_wait() {
        Ok(Some(status)) => {
            log_exit(&running.session_id, status);
            *current = None;
        },
        Ok(None) => {},
        Err(e) => warn!(session_id = %running.session_id, error = %e, "Failed to poll agent"),
    }
}

fn log_exit(session_id: &str, status: ExitStatus) {
    if status.success() {
        info!(session_id, %status, "Agent exited");
    } else {
        warn!(session_id, %status, "Agent exited");
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> io::Result<()> {
    // None once the child has been reaped
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = libc::pid_t::try_from(pid).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: kill(2) has no memory-safety preconditions
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn shell_agent(script: &str, grace: Duration) -> ProcessSupervisor {
        ProcessSupervisor::new(AgentConfig {
            program: "sh".to_string(),
            // $0 = "agent", then the session flag and id as $1 $2
            args: vec!["-c".to_string(), script.to_string(), "agent".to_string()],
            session_flag: "--chat_id".to_string(),
            required_env: Vec::new(),
            grace_period: grace,
        })
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let supervisor = shell_agent("exec sleep 30", Duration::from_secs(5));

        supervisor.start("chat-1").await.unwrap();
        assert!(supervisor.is_running().await);
        assert_eq!(supervisor.session_id().await.as_deref(), Some("chat-1"));

        assert_eq!(supervisor.stop().await.unwrap(), StopOutcome::Terminated);
        assert!(!supervisor.is_running().await);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let supervisor = shell_agent("exec sleep 30", Duration::from_secs(5));
        supervisor.start("chat-1").await.unwrap();

        let err = supervisor.start("chat-2").await.unwrap_err();

        assert!(matches!(err, SupervisorError::AlreadyRunning(ref id) if id == "chat-1"));
        supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_without_agent() {
        let supervisor = shell_agent("exec sleep 30", Duration::from_secs(5));
        assert!(matches!(
            supervisor.stop().await,
            Err(SupervisorError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_stubborn_agent_is_killed() {
        let supervisor = shell_agent("trap '' TERM; exec sleep 30", Duration::from_millis(300));
        supervisor.start("chat-1").await.unwrap();
        // let the shell install its trap first
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(supervisor.stop().await.unwrap(), StopOutcome::Killed);
        assert!(!supervisor.is_running().await);
    }

    #[tokio::test]
    async fn test_exited_agent_is_reaped() {
        let supervisor = shell_agent("exit 0", Duration::from_secs(5));
        supervisor.start("chat-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(!supervisor.is_running().await);
        assert!(matches!(
            supervisor.stop().await,
            Err(SupervisorError::NotRunning)
        ));
        // and a new session can start
        supervisor.start("chat-2").await.unwrap();
    }

    #[tokio::test]
    async fn test_session_id_is_passed_to_agent() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("args");
        let script = format!("echo \"$1 $2\" > {}", out.display());
        let supervisor = shell_agent(&script, Duration::from_secs(5));

        supervisor.start("chat-42").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written.trim(), "--chat_id chat-42");
    }

    #[tokio::test]
    async fn test_missing_required_env() {
        let supervisor = ProcessSupervisor::new(AgentConfig {
            program: "sh".to_string(),
            args: vec![],
            session_flag: "--chat_id".to_string(),
            required_env: vec!["BLOOM_TEST_UNSET_AGENT_KEY".to_string()],
            grace_period: Duration::from_secs(1),
        });

        let err = supervisor.start("chat-1").await.unwrap_err();

        assert!(matches!(err, SupervisorError::MissingEnv(ref name) if name == "BLOOM_TEST_UNSET_AGENT_KEY"));
        assert!(!supervisor.is_running().await);
    }
}
