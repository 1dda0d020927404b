//! The production [`serve_core::Launcher`]: runs the user's command through
//! `sh -c`. Only ever invoked in the forked child, after stdio has already
//! been wired to the connection and the stderr pipe — panicking here would
//! unwind across a fork boundary with duplicated locks in an undefined
//! state, so failure is reported and the process exits directly instead.

use nix::unistd::execvp;
use serve_core::Launcher;
use std::ffi::CString;

pub struct ShellLauncher {
    command: CString,
}

impl ShellLauncher {
    pub fn new(command: String) -> Self {
        let command = CString::new(command).unwrap_or_else(|_| {
            CString::new("echo 'serve: command contained a NUL byte'; exit 127").unwrap()
        });
        ShellLauncher { command }
    }
}

impl Launcher for ShellLauncher {
    fn exec_in_child(&self) -> ! {
        let sh = CString::new("sh").unwrap();
        let args = [sh.clone(), CString::new("-c").unwrap(), self.command.clone()];
        let Err(err) = execvp(&sh, &args) else {
            unreachable!("execvp only returns on failure")
        };
        eprintln!("serve: exec sh -c: {err}");
        std::process::exit(127);
    }
}
