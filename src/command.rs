//! Structured remote commands.
//!
//! Remote work is described as an argument vector rather than a formatted
//! shell string. The vector is only flattened at the SSH boundary, where each
//! argument is shell-escaped individually.

use std::fmt;

use shell_escape::unix::escape;

/// A command to execute on a remote host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommand {
    program: String,
    args: Vec<String>,
    privileged: bool,
}

impl RemoteCommand {
    /// Starts a command that runs as the connecting user.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            privileged: false,
        }
    }

    /// Starts a command that runs through `sudo`.
    #[must_use]
    pub fn sudo(program: impl Into<String>) -> Self {
        Self {
            privileged: true,
            ..Self::new(program)
        }
    }

    /// Appends a single argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments in order.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments following the program name.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Whether the command is elevated with `sudo`.
    #[must_use]
    pub const fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// Full argument vector including the `sudo` prefix when privileged.
    #[must_use]
    pub fn argv(&self) -> Vec<&str> {
        let mut argv = Vec::with_capacity(self.args.len() + 3);
        if self.privileged {
            argv.push("sudo");
            argv.push("--");
        }
        argv.push(self.program.as_str());
        argv.extend(self.args.iter().map(String::as_str));
        argv
    }

    /// Renders the command as a single shell line with every argument
    /// escaped.
    #[must_use]
    pub fn to_shell_line(&self) -> String {
        self.argv()
            .into_iter()
            .map(|part| escape(part.into()).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn shell_line_escapes_each_argument() {
        let command = RemoteCommand::new("echo").arg("a b").arg("c'd");

        assert_eq!(command.to_shell_line(), "echo 'a b' 'c'\\''d'");
    }

    #[rstest]
    fn privileged_commands_are_prefixed_with_sudo() {
        let command = RemoteCommand::sudo("service").args(["nginx", "reload"]);

        assert_eq!(command.argv(), vec!["sudo", "--", "service", "nginx", "reload"]);
        assert!(command.is_privileged());
    }

    #[rstest]
    fn metacharacters_never_reach_the_shell_unquoted() {
        let command = RemoteCommand::new("rm").arg("-f").arg("/tmp/x; rm -rf /");

        assert_eq!(command.to_shell_line(), "rm -f '/tmp/x; rm -rf /'");
    }
}
