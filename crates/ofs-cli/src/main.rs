// Copyright (c) Contributors to the ofs project.
// SPDX-License-Identifier: Apache-2.0

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

/// Compose directories and files into a single view through fuse-overlayfs
#[derive(Parser)]
#[clap(name = "ofs", version = ofs::VERSION)]
struct Opt {
    /// Make the output more verbose (-v, -vv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Also write the log to this file
    #[clap(long, global = true)]
    log_file: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Dryrun(CmdDryrun),
    Run(CmdRun),
}

#[derive(Args)]
struct MappingArgs {
    /// Layer a source directory into a destination
    #[clap(long = "dir", value_name = "SRC:DST")]
    directories: Vec<String>,

    /// Make a single file visible at another location
    #[clap(long = "file", value_name = "SRC:DST")]
    files: Vec<String>,

    /// Hide files whose name ends with this suffix
    #[clap(long = "skip-suffix", value_name = "SUFFIX")]
    skip_suffixes: Vec<String>,

    /// Hide directories with this name anywhere in a source tree
    #[clap(long = "skip-dir", value_name = "NAME")]
    skip_directories: Vec<String>,

    /// The writable layer for destinations without an overwrite source
    #[clap(long, value_name = "DIR")]
    upper: Option<PathBuf>,

    /// Load a json mapping profile before applying the other flags
    #[clap(long, value_name = "FILE")]
    profile: Option<PathBuf>,
}

impl MappingArgs {
    fn apply(&self, manager: &ofs::Manager) -> ofs::Result<()> {
        if let Some(path) = &self.profile {
            manager.apply_profile(&ofs::Profile::from_file(path)?)?;
        }
        if let Some(upper) = &self.upper {
            manager.set_upper_dir(upper.clone(), true)?;
        }
        for suffix in self.skip_suffixes.iter() {
            manager.add_skip_file_suffix(suffix.clone())?;
        }
        for name in self.skip_directories.iter() {
            manager.add_skip_directory(name.clone())?;
        }
        for pair in self.directories.iter() {
            let (source, destination) = split_mapping(pair)?;
            manager.add_directory(source, destination)?;
        }
        for pair in self.files.iter() {
            let (source, destination) = split_mapping(pair)?;
            manager.add_file(source, destination)?;
        }
        Ok(())
    }
}

fn split_mapping(pair: &str) -> ofs::Result<(PathBuf, PathBuf)> {
    match pair.split_once(':') {
        Some((source, destination)) if !source.is_empty() && !destination.is_empty() => {
            Ok((source.into(), destination.into()))
        }
        _ => Err(ofs::Error::InvalidConfiguration(format!(
            "mappings take the form SRC:DST, got {pair:?}"
        ))),
    }
}

/// Report what would be mounted without touching disk
#[derive(Args)]
struct CmdDryrun {
    #[clap(flatten)]
    mappings: MappingArgs,
}

impl CmdDryrun {
    fn run(&self) -> ofs::Result<i32> {
        let manager = ofs::Manager::new();
        self.mappings.apply(&manager)?;
        manager.dryrun()?;
        Ok(0)
    }
}

/// Mount the composed view, run a command under it, unmount again
#[derive(Args)]
struct CmdRun {
    #[clap(flatten)]
    mappings: MappingArgs,

    /// Do not pass --debug to the overlay helper
    #[clap(long)]
    quiet_helper: bool,

    /// Seconds to wait for each helper invocation
    #[clap(long, default_value_t = 10, value_name = "SECONDS")]
    helper_timeout: u64,

    /// The command to run in the composed view and its arguments
    ///
    /// Place '--' before the command so its own flags are passed
    /// through untouched: `ofs run --dir a:b -- make -j4`
    #[arg(last = true, value_name = "COMMAND", required = true)]
    command: Vec<OsString>,
}

impl CmdRun {
    fn run(&self) -> ofs::Result<i32> {
        let manager = ofs::Manager::new();
        manager.set_helper_timeout(Duration::from_secs(self.helper_timeout));
        if self.quiet_helper {
            manager.set_debug_mode(false);
        }
        self.mappings.apply(&manager)?;
        manager.mount()?;

        // run the child in the foreground and reverse the mount however
        // the child goes
        let mut cmd = std::process::Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);
        tracing::debug!("{:?}", cmd);
        let status = cmd.status().map_err(|err| {
            ofs::Error::process_spawn_error(self.command[0].to_string_lossy(), err)
        });
        let unmounted = manager.umount();

        let status = status?;
        unmounted?;
        Ok(status.code().unwrap_or(1))
    }
}

fn main() {
    // exiting from main directly would skip destructors, so the actual
    // logic lives in a separate function
    std::process::exit(main2())
}

fn main2() -> i32 {
    let opt = Opt::parse();
    if let Err(err) =
        ofs::logging::configure_logging(opt.verbose as usize, opt.log_file.as_deref())
    {
        eprintln!("failed to configure logging: {err}");
        return 1;
    }

    let result = match &opt.command {
        Command::Dryrun(cmd) => cmd.run(),
        Command::Run(cmd) => cmd.run(),
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err}");
            1
        }
    }
}
