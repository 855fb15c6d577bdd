use std::fs;
use std::io;
use std::path::Path;

/// Creates the `.bin` entry point for an executable a package declares.
pub trait EntryPointShim: Send + Sync {
    fn create(&self, target: &Path, shim: &Path) -> io::Result<()>;
}

/// A plain symbolic link to the target script, marked executable.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymlinkShim;

/// `<shim>.cmd` for cmd.exe plus an extension-less sh wrapper for POSIX shells on Windows.
#[derive(Debug, Default, Clone, Copy)]
pub struct CmdShim;

impl EntryPointShim for SymlinkShim {
    #[cfg(unix)]
    fn create(&self, target: &Path, shim: &Path) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        std::os::unix::fs::symlink(target, shim)?;
        if let Ok(meta) = fs::metadata(target) {
            let mut perms = meta.permissions();
            if perms.mode() & 0o111 != 0o111 {
                perms.set_mode(perms.mode() | 0o755);
                fs::set_permissions(target, perms)?;
            }
        }
        Ok(())
    }

    #[cfg(windows)]
    fn create(&self, target: &Path, shim: &Path) -> io::Result<()> {
        std::os::windows::fs::symlink_file(target, shim)
    }

    #[cfg(not(any(unix, windows)))]
    fn create(&self, _target: &Path, _shim: &Path) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "symbolic links are not supported"))
    }
}

impl EntryPointShim for CmdShim {
    fn create(&self, target: &Path, shim: &Path) -> io::Result<()> {
        let target = target.to_string_lossy();
        let cmd = format!(
            "@ECHO off\r\nSETLOCAL\r\nIF EXIST \"%~dp0\\node.exe\" (\r\n  SET \"_prog=%~dp0\\node.exe\"\r\n) ELSE (\r\n  SET \"_prog=node\"\r\n)\r\n\"%_prog%\" \"{target}\" %*\r\n"
        );
        let mut cmd_path = shim.as_os_str().to_owned();
        cmd_path.push(".cmd");
        fs::write(cmd_path, cmd)?;
        let sh = format!(
            "#!/bin/sh\nbasedir=$(dirname \"$(echo \"$0\" | sed -e 's,\\\\,/,g')\")\nif [ -x \"$basedir/node\" ]; then\n  exec \"$basedir/node\" \"{target}\" \"$@\"\nfi\nexec node \"{target}\" \"$@\"\n"
        );
        fs::write(shim, sh)
    }
}

/// The entry point flavour for the platform spodr was built for.
pub fn platform_shim() -> Box<dyn EntryPointShim> {
    if cfg!(windows) {
        Box::new(CmdShim)
    } else {
        Box::new(SymlinkShim)
    }
}
