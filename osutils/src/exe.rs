use std::{
    os::unix::process::ExitStatusExt,
    process::{Command, Output},
};

use anyhow::{bail, Context, Error};
use log::trace;

use crate::crate_private::Sealed;

/// Extension for `std::process::Command` that runs the command to completion
/// and turns unsuccessful exits into errors carrying the rendered command
/// line and any captured output. This is a sealed trait.
pub trait RunAndCheck: Sealed {
    /// Run to completion, failing on a non-zero exit.
    fn run_and_check(&mut self) -> Result<(), Error>;

    /// Run to completion and return stdout, failing on a non-zero exit.
    fn output_and_check(&mut self) -> Result<String, Error>;

    /// Run to completion and hand back the raw output regardless of exit
    /// status; only a failure to spawn is an error.
    fn try_output(&mut self) -> Result<Output, Error>;

    /// Render the program and arguments the way a shell would display them.
    fn render(&self) -> String;
}

impl Sealed for Command {}

impl RunAndCheck for Command {
    fn run_and_check(&mut self) -> Result<(), Error> {
        self.output_and_check().map(drop)
    }

    fn output_and_check(&mut self) -> Result<String, Error> {
        let output = self.try_output()?;
        if !output.status.success() {
            let report = output_report(&output);
            let mut message = format!(
                "{}\nCmdline: {}",
                describe_exit(&output),
                self.render()
            );
            if !report.is_empty() {
                message.push('\n');
                message.push_str(&report);
            }
            bail!(message);
        }
        Ok(String::from_utf8_lossy(&output.stdout).into())
    }

    fn try_output(&mut self) -> Result<Output, Error> {
        let rendered = self.render();
        trace!("Executing '{rendered}'");
        let output = self
            .output()
            .with_context(|| format!("Failed to execute '{rendered}'"))?;
        trace!("Finished '{rendered}': {}", describe_exit(&output));
        Ok(output)
    }

    fn render(&self) -> String {
        std::iter::once(self.get_program())
            .chain(self.get_args())
            .map(|arg| {
                let arg = arg.to_string_lossy();
                if arg.contains(' ') || arg.is_empty() {
                    format!("'{arg}'")
                } else {
                    arg.into()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn describe_exit(output: &Output) -> String {
    if let Some(code) = output.status.code() {
        format!("Process exited with status: {code}")
    } else if let Some(signal) = output.status.signal() {
        format!("Process was terminated by signal: {signal}")
    } else {
        "Process exited with unknown status".into()
    }
}

fn output_report(output: &Output) -> String {
    let mut report = String::new();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.trim().is_empty() {
        report += &format!("stdout:\n{stdout}");
    }
    if !stderr.trim().is_empty() {
        if !report.is_empty() {
            report.push('\n');
        }
        report += &format!("stderr:\n{stderr}");
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_and_check() {
        let mut cmd = Command::new("echo");
        cmd.arg("something");
        assert_eq!(cmd.output_and_check().unwrap(), "something\n");

        // Non-zero exit
        Command::new("false").run_and_check().unwrap_err();

        // Missing binary
        Command::new("nonexistent_command_1234")
            .arg("/nonexistent")
            .run_and_check()
            .unwrap_err();

        // Failure output is carried in the error
        let err = Command::new("cat")
            .arg("/nonexistent_file_1234")
            .output_and_check()
            .unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("Cmdline: cat /nonexistent_file_1234"), "{message}");
        assert!(message.contains("stderr:"), "{message}");
    }

    #[test]
    fn test_try_output_keeps_failures() {
        let output = Command::new("false").try_output().unwrap();
        assert_eq!(output.status.code(), Some(1));

        Command::new("nonexistent_command_1234")
            .try_output()
            .unwrap_err();
    }

    #[test]
    fn test_render() {
        let mut cmd = Command::new("echo");
        cmd.arg("something");
        assert_eq!(cmd.render(), "echo something");

        let mut cmd = Command::new("echo");
        cmd.arg("something with spaces").arg("");
        assert_eq!(cmd.render(), "echo 'something with spaces' ''");
    }
}
