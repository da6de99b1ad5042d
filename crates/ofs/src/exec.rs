// Copyright (c) Contributors to the ofs project.
// SPDX-License-Identifier: Apache-2.0

//! Invocation of external helper processes.
//!
//! This is the only module that touches process APIs; everything else
//! goes through the [`HelperRunner`] trait so tests can substitute a
//! scripted implementation.

use std::ffi::OsString;
use std::io::Read;
use std::time::{Duration, Instant};

use crate::{Error, Result};

#[cfg(test)]
#[path = "./exec_test.rs"]
mod exec_test;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// The outcome of a finished helper process.
#[derive(Debug, Clone)]
pub struct HelperOutput {
    /// The exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Merged stdout and stderr.
    pub output: String,
}

impl HelperOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs an external program to completion within a bounded time.
pub trait HelperRunner: Send + Sync {
    fn run(&self, program: &str, args: &[OsString], timeout: Duration) -> Result<HelperOutput>;
}

/// Render a program and its arguments the way a shell would show them.
pub fn command_line(program: &str, args: &[OsString]) -> String {
    let mut line = program.to_string();
    for arg in args.iter() {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

/// The production runner: spawns the child, drains its output off
/// thread, and kills it when the deadline passes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl HelperRunner for SystemRunner {
    fn run(&self, program: &str, args: &[OsString], timeout: Duration) -> Result<HelperOutput> {
        let mut cmd = std::process::Command::new(program);
        cmd.args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        tracing::debug!("{:?}", cmd);

        let mut child = cmd
            .spawn()
            .map_err(|err| Error::process_spawn_error(command_line(program, args), err))?;

        // drain both pipes while waiting so a chatty child can never
        // fill a pipe and stall
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        tracing::error!("'{program}' did not finish in time, killing it");
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(Error::HelperTimeout {
                            command: command_line(program, args),
                            timeout,
                        });
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(err) => {
                    let _ = child.kill();
                    return Err(Error::process_spawn_error(
                        command_line(program, args),
                        err,
                    ));
                }
            }
        };

        let mut output = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        if !stderr.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&stderr);
        }

        Ok(HelperOutput {
            code: status.code(),
            output,
        })
    }
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut stream) = stream {
            let _ = stream.read_to_string(&mut buf);
        }
        buf
    })
}
