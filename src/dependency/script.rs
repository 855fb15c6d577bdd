use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScriptStage {
    Preinstall,
    Install,
    Postinstall,
}

impl ScriptStage {
    pub const ALL: [ScriptStage; 3] =
        [ScriptStage::Preinstall, ScriptStage::Install, ScriptStage::Postinstall];

    pub fn as_str(self) -> &'static str {
        match self {
            ScriptStage::Preinstall => "preinstall",
            ScriptStage::Install => "install",
            ScriptStage::Postinstall => "postinstall",
        }
    }
}

impl fmt::Display for ScriptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle script of a downloaded package, run through the package manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub version_tag: String,
    pub stage: ScriptStage,
    pub cwd: PathBuf,
}

impl Script {
    pub fn new(version_tag: impl Into<String>, stage: ScriptStage, cwd: impl Into<PathBuf>) -> Self {
        Self { version_tag: version_tag.into(), stage, cwd: cwd.into() }
    }

    /// Runs `<package_manager> run <stage>` in the package directory. Failures
    /// are reported and swallowed; returns whether the script succeeded.
    pub fn process(&self, package_manager: &str) -> bool {
        warn!("Processing '{}' script for '{}'…", self.stage, self.version_tag);
        let command_line = format!("{} run {}", package_manager, self.stage);
        let outcome = shell(&command_line, &self.cwd).stdin(Stdio::null()).output();
        let failure = match outcome {
            Ok(output) if output.status.success() => return true,
            Ok(output) => format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => e.to_string(),
        };
        error!(
            "Running '{}' script for '{}' failed. The component is unlikely to perform correctly. Run '{}' in '{}' to retry the operation manually.",
            self.stage,
            self.version_tag,
            command_line,
            self.cwd.display()
        );
        debug!("{}", failure);
        false
    }
}

fn shell(command_line: &str, cwd: &Path) -> Command {
    let mut c = if cfg!(windows) {
        let mut cc = Command::new("cmd");
        cc.arg("/C").arg(command_line);
        cc
    } else {
        let mut cc = Command::new("sh");
        cc.arg("-c").arg(command_line);
        cc
    };
    c.current_dir(cwd);
    c
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn failing_script_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::new("a@1.0.0", ScriptStage::Install, dir.path());
        assert!(!script.process("false"));
        assert!(script.process("true"));
    }
}
