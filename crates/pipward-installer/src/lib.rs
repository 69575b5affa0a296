mod audit;
mod backend;
mod command;
mod executor;
mod layout;
mod pip;
mod store;

pub use audit::{find_on_path, run_audit, AuditConfig, PIPDEPTREE_TOOL, PIP_AUDIT_TOOL};
pub use backend::PackageBackend;
pub use command::{run_command, CommandOutput};
pub use executor::{
    build_run_report, new_run_id, RunEvent, RunOptions, RunOutcome, UpgradeRunner,
};
pub use layout::{default_state_root, StateLayout};
pub use pip::{parse_show_license, PipBackend};
pub use store::{latest_ledger, read_ledger, write_ledger, write_ledger_to, write_run_report};
