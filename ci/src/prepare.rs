use bitflags::bitflags;

bitflags! {
    /// Flags that may modify how a command is prepared.
    #[derive(Clone, Copy)]
    pub struct Flag: u32 {
        /// Continue with the remaining commands after a failure.
        const KEEP_GOING = 1;
    }
}

/// A trait for preparing a subcommand to be run.
pub trait Prepare {
    fn prepare<'a>(&self, sh: &'a xshell::Shell, flags: Flag) -> Vec<PreparedCommand<'a>>;
}

/// A shell command prepared by a subcommand, together with the metadata
/// needed to report its failure.
pub struct PreparedCommand<'a> {
    /// The name of the subcommand that prepared this, used when reporting
    /// failures.
    pub name: &'static str,

    /// The command to execute.
    pub command: xshell::Cmd<'a>,

    /// A message displayed when the command fails.
    pub failure_message: &'static str,

    /// The subdirectory to run the command in, if any.
    pub subdir: Option<&'static str>,

    /// Environment variables set for the command.
    pub env_vars: Vec<(&'static str, &'static str)>,
}

impl<'a> PreparedCommand<'a> {
    pub fn new<T: argh::SubCommand>(
        command: xshell::Cmd<'a>,
        failure_message: &'static str,
    ) -> Self {
        PreparedCommand {
            name: T::COMMAND.name,
            command,
            failure_message,
            subdir: None,
            env_vars: vec![],
        }
    }

    pub fn with_env_var(mut self, key: &'static str, value: &'static str) -> Self {
        self.env_vars.push((key, value));
        self
    }
}
