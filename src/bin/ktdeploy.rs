/*
 * SPDX-FileCopyrightText: Copyright (c) 2023-2025, NVIDIA CORPORATION. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use argh::FromArgs;
use ktdeploy::{Config, Options, Overrides, Verbosity};
use std::path::PathBuf;

fn answer(value: &str) -> Result<bool, String> {
    ktdeploy::parse_answer(value).ok_or_else(|| format!("expected `yes` or `no`, got `{value}`"))
}

#[derive(FromArgs)]
/// Provision Kerberos principals in FreeIPA and deploy their keytabs to cluster hosts.
struct Arguments {
    /// configuration file (default: /etc/ktdeploy.toml)
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,
    /// the FreeIPA server used to retrieve keytabs (default: local FQDN)
    #[argh(option, short = 's')]
    server: Option<String>,
    /// bind DN used to retrieve keytabs
    #[argh(option, short = 'D')]
    bind_dn: Option<String>,
    /// bind password used to retrieve keytabs
    #[argh(option, short = 'w')]
    bind_password: Option<String>,
    /// answer the export prompt (yes|no)
    #[argh(option, from_str_fn(answer))]
    export_keytabs: Option<bool>,
    /// answer the distribution prompt (yes|no)
    #[argh(option, from_str_fn(answer))]
    rsync_keytabs: Option<bool>,
    /// report what would be created without changing anything
    #[argh(switch, short = 'n')]
    dry_run: bool,
    /// only log warnings and errors
    #[argh(switch, short = 'q')]
    quiet: bool,
    /// log debugging information
    #[argh(switch, short = 'v')]
    verbose: bool,
    /// principal records file
    #[argh(positional)]
    input: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
#[snafu::report]
async fn main() -> Result<(), ktdeploy::Error> {
    let args: Arguments = argh::from_env();

    let verbosity = match (args.quiet, args.verbose) {
        (_, true) => Verbosity::Verbose,
        (true, false) => Verbosity::Quiet,
        _ => Verbosity::Normal,
    };
    ktdeploy::setup_logging(verbosity)?;

    let config = Config::load(
        args.config.as_deref(),
        Overrides {
            server: args.server,
            bind_dn: args.bind_dn,
            bind_password: args.bind_password,
        },
    )?;
    config.log();

    let report = ktdeploy::run(
        &config,
        Options {
            input: args.input,
            export: args.export_keytabs,
            distribute: args.rsync_keytabs,
            dry_run: args.dry_run,
        },
    )
    .await?;
    report.log();

    Ok(())
}
