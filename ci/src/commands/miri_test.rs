use argh::FromArgs;
use xshell::cmd;

use crate::Flag;
use crate::Prepare;
use crate::PreparedCommand;

/// Runs the miri test suite on the nightly toolchain.
#[derive(FromArgs, Default)]
#[argh(subcommand, name = "miri-test")]
pub struct MiriTestCommand {}

impl Prepare for MiriTestCommand {
    fn prepare<'a>(&self, sh: &'a xshell::Shell, _flags: Flag) -> Vec<PreparedCommand<'a>> {
        let command = PreparedCommand::new::<Self>(
            cmd!(sh, "cargo +nightly miri test --test miri"),
            "Please fix reported undefined behavior in output above.",
        )
        .with_env_var("MIRIFLAGS", "-Zmiri-disable-isolation");
        vec![command]
    }
}
