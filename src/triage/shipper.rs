use std::io;
use std::path::PathBuf;
use std::process::Command;

use log::{debug, info};
use thiserror::Error;

use crate::triage::command::ShipmentPlan;

#[derive(Error, Debug)]
pub enum ShipperError {
    #[error("Unable to start {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} exited unsuccessfully ({})", .program.display(), describe_exit(.code))]
    ExitStatus { program: PathBuf, code: Option<i32> },
}

pub type ShipperResult<T> = Result<T, ShipperError>;

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// Runs a shipment plan to completion.
pub trait ShipperRunner {
    fn run(&self, plan: &ShipmentPlan) -> ShipperResult<()>;
}

/// Spawns the shipper as a child process with inherited stdio and waits for it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessShipper;

impl ShipperRunner for ProcessShipper {
    fn run(&self, plan: &ShipmentPlan) -> ShipperResult<()> {
        info!("Command executed:");
        info!("{}", plan.display());

        let status = Command::new(&plan.program)
            .args(&plan.args)
            .status()
            .map_err(|source| ShipperError::Spawn {
                program: plan.program.clone(),
                source,
            })?;

        debug!("{} exited with {}", plan.program.display(), status);
        if status.success() {
            Ok(())
        } else {
            Err(ShipperError::ExitStatus {
                program: plan.program.clone(),
                code: status.code(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(program: &str, args: &[&str]) -> ShipmentPlan {
        ShipmentPlan {
            program: PathBuf::from(program),
            args: args.iter().map(|a| a.to_string()).collect(),
            groups: Vec::new(),
            total_expected: 0,
        }
    }

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let result = ProcessShipper.run(&plan("/nonexistent/shipper/filebeat", &["--once"]));
        assert!(matches!(result, Err(ShipperError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_codes() {
        assert!(ProcessShipper.run(&plan("sh", &["-c", "exit 0"])).is_ok());
        match ProcessShipper.run(&plan("sh", &["-c", "exit 3"])) {
            Err(ShipperError::ExitStatus { code, .. }) => assert_eq!(code, Some(3)),
            other => panic!("expected ExitStatus, got {:?}", other),
        }
    }
}
