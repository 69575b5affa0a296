mod contract;
mod ledger;
mod manifest;
mod plan;
mod report;
mod requirement;
mod version;

pub use contract::{
    parse_contract_input, ClonerInfo, ContractContext, ContractInput, ContractParameters,
    FailurePayload, FailureStatus, PublishOptions, PublishedArtifact, CONTRACT_COMMAND,
};
pub use ledger::{
    HaltReason, LedgerBuilder, LedgerRecord, LedgerSummary, RecordStatus, RunMode, UpgradeLedger,
    TOOL_NAME,
};
pub use manifest::RequirementsManifest;
pub use plan::{build_upgrade_plan, PlannedAction, PlannedChange, UpgradePlan};
pub use report::{
    AuditReport, ExecutionDetail, Mismatch, ReportError, ReportInputs, ReportStatus,
    ResultStatus, RetryDetail, RunReport, RunResult, ToolAudit, Verification, VerificationStatus,
};
pub use requirement::{normalize_name, ExpectedHash, Requirement, SpecifierOp, VersionSpecifier};
pub use version::{compare_versions, specifier_matches, PreLabel, PythonVersion};

#[cfg(test)]
mod tests;
