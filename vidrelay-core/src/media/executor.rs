use std::path::Path;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;

/// Runs an external media tool and captures its output.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn output(&self, program: &Path, args: &[String]) -> std::io::Result<Output>;
}

/// Spawns real processes. Dropping the returned future kills the child.
pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn output(&self, program: &Path, args: &[String]) -> std::io::Result<Output> {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
    }
}
