use anyhow::Result;

use crate::completion::write_completions_script;
use crate::config::{load_config_file, resolve_settings, EnvOverrides, FlagOverrides, Settings};
use crate::flows::{
    audit_flow, json_flow, ledger_flow, plan_flow, run_flow, run_mode, RunRequest,
};
use crate::{Cli, Commands};

pub(crate) fn run_cli(cli: Cli) -> Result<u8> {
    let load_settings = |flags: FlagOverrides| -> Result<Settings> {
        let file = load_config_file(cli.config.as_deref())?;
        resolve_settings(file, &EnvOverrides::from_process(), &flags)
    };
    let base_flags = FlagOverrides {
        python: cli.python.clone(),
        state_dir: cli.state_dir.clone(),
        ..FlagOverrides::default()
    };

    match cli.command {
        Commands::Run {
            manifest,
            dry_run,
            force_reinstall,
            audit,
            ledger,
            user,
            trusted_key,
            manifest_signature,
            no_retry,
            keep_downloads,
        } => {
            let settings = load_settings(FlagOverrides {
                user,
                no_retry,
                keep_downloads,
                ..base_flags
            })?;
            run_flow(
                &settings,
                RunRequest {
                    manifest,
                    mode: run_mode(dry_run, force_reinstall),
                    audit,
                    ledger,
                    trusted_key,
                    manifest_signature,
                },
            )
        }
        Commands::Plan {
            manifest,
            force_reinstall,
        } => plan_flow(&load_settings(base_flags)?, &manifest, force_reinstall),
        Commands::Audit => audit_flow(&load_settings(base_flags)?),
        Commands::Ledger { path, json } => {
            ledger_flow(&load_settings(base_flags)?, path.as_deref(), json)
        }
        Commands::Json { input } => json_flow(&load_settings(base_flags)?, input.as_deref()),
        Commands::Completions { shell } => {
            write_completions_script(shell, &mut std::io::stdout().lock())?;
            Ok(0)
        }
        Commands::Version => {
            println!("pipward {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    }
}
