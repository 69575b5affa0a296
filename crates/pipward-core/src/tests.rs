use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use super::*;

const ZERO_SHA256: &str = "0000000000000000000000000000000000000000000000000000000000000000";
const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

fn started_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53)
        .single()
        .expect("valid timestamp")
}

fn manifest(input: &str) -> RequirementsManifest {
    RequirementsManifest::parse(input).expect("manifest should parse")
}

fn installed(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(name, version)| (normalize_name(name), version.to_string()))
        .collect()
}

#[test]
fn parse_requirements_manifest() {
    let parsed = manifest(
        r#"
# release toolchain
requests[security,socks]>=2.31,<3 ; python_version >= "3.8"
Flask_Login==0.6.3  # pinned for the admin UI
urllib3 ~= 2.0

"#,
    );

    assert_eq!(parsed.len(), 3);
    let requests = &parsed.requirements[0];
    assert_eq!(requests.name, "requests");
    assert_eq!(requests.extras, vec!["security", "socks"]);
    assert_eq!(requests.specifier_string(), ">=2.31,<3");
    assert_eq!(requests.marker.as_deref(), Some("python_version >= \"3.8\""));
    assert_eq!(requests.pinned_version(), None);
    assert_eq!(requests.install_spec(), "requests[security,socks]>=2.31,<3");

    let flask_login = parsed.get("flask-login").expect("lookup by normalized name");
    assert_eq!(flask_login.pinned_version(), Some("0.6.3"));
    assert_eq!(flask_login.install_spec(), "Flask_Login==0.6.3");

    let urllib3 = &parsed.requirements[2];
    assert_eq!(urllib3.specifiers[0].op, SpecifierOp::Compatible);
    assert_eq!(urllib3.to_string(), "urllib3~=2.0");
}

#[test]
fn parse_joins_hash_continuations() {
    let input = format!(
        "attrs==23.2.0 \\\n    --hash=sha256:{ZERO_SHA256} \\\n    --hash sha256:{}\nsix==1.16.0 --hash=SHA256:{EMPTY_SHA256}\n",
        EMPTY_SHA256.to_uppercase()
    );
    let parsed = manifest(&input);

    assert!(parsed.requires_hashes());
    let attrs = &parsed.requirements[0];
    assert_eq!(attrs.hashes.len(), 2);
    assert_eq!(attrs.hashes[0].to_string(), format!("sha256:{ZERO_SHA256}"));
    assert_eq!(attrs.hashes[1].hex, EMPTY_SHA256);
    assert!(attrs.hashes[1].matches(&EMPTY_SHA256.to_uppercase()));
    assert_eq!(parsed.requirements[1].hashes[0].algorithm, "sha256");
}

#[test]
fn parse_rejects_partial_hash_coverage() {
    let input = format!("attrs==23.2.0 --hash=sha256:{ZERO_SHA256}\nsix==1.16.0\n");
    let err = RequirementsManifest::parse(&input).expect_err("mixed hashing must fail");
    assert!(
        err.to_string().contains("requirements without --hash: six"),
        "unexpected error: {err}"
    );
}

#[test]
fn parse_rejects_unsupported_hash_algorithm() {
    let err = RequirementsManifest::parse("attrs==23.2.0 --hash=md5:abc\n")
        .expect_err("md5 must be rejected");
    assert!(
        format!("{err:#}").contains("unsupported hash algorithm 'md5'"),
        "unexpected error: {err:#}"
    );
}

#[test]
fn parse_rejects_option_lines_and_direct_references() {
    let err = RequirementsManifest::parse("-r base.txt\n").expect_err("options are rejected");
    assert!(format!("{err:#}").contains("requirements line 1"));
    assert!(format!("{err:#}").contains("option lines are not supported"));

    let err = RequirementsManifest::parse("six\npkg @ https://example.test/pkg.whl\n")
        .expect_err("direct references are rejected");
    assert!(format!("{err:#}").contains("requirements line 2"));
}

#[test]
fn parse_rejects_malformed_specifiers() {
    for line in ["pkg>=", "pkg 1.0", "pkg~=1", "pkg>=1.*", "_pkg==1.0", "pkg[extra"] {
        assert!(
            RequirementsManifest::parse(line).is_err(),
            "'{line}' should be rejected"
        );
    }
}

#[test]
fn parse_deduplicates_identical_lines_and_rejects_conflicts() {
    let parsed = manifest("six==1.16.0\nSix==1.16.0\n");
    assert_eq!(parsed.len(), 1);

    let err = RequirementsManifest::parse("six==1.16.0\nsix==1.15.0\n")
        .expect_err("conflicting duplicates must fail");
    assert!(err.to_string().contains("listed more than once"));
}

#[test]
fn normalize_name_collapses_separators() {
    assert_eq!(normalize_name("Flask_Login"), "flask-login");
    assert_eq!(normalize_name("zope.interface"), "zope-interface");
    assert_eq!(normalize_name("a__-.b"), "a-b");
}

#[test]
fn manifest_from_published_versions_pins_and_dedupes() {
    let packages = vec![
        "x_make_markdown_x".to_string(),
        String::new(),
        "x-make-pypi-x".to_string(),
        "X_Make_Markdown_X".to_string(),
    ];
    let mut published = BTreeMap::new();
    published.insert("x_make_markdown_x".to_string(), Some("1.4.0".to_string()));
    published.insert("x_make_pypi_x".to_string(), None);

    let parsed =
        RequirementsManifest::from_published_versions(&packages, &published).expect("must build");

    assert_eq!(parsed.names(), vec!["x_make_markdown_x", "x-make-pypi-x"]);
    assert_eq!(parsed.requirements[0].install_spec(), "x_make_markdown_x==1.4.0");
    assert_eq!(parsed.requirements[1].install_spec(), "x-make-pypi-x");
}

#[test]
fn python_versions_parse_and_normalize() {
    let normalized = |text: &str| PythonVersion::parse(text).map(|v| v.to_string());

    assert_eq!(normalized("1.2").as_deref(), Some("1.2"));
    assert_eq!(normalized("v3").as_deref(), Some("3"));
    assert_eq!(normalized("2.0.0RC1").as_deref(), Some("2.0.0rc1"));
    assert_eq!(normalized("1.0-alpha.2").as_deref(), Some("1.0a2"));
    assert_eq!(normalized("1.0-1").as_deref(), Some("1.0.post1"));
    assert_eq!(normalized("1.0.rev3").as_deref(), Some("1.0.post3"));
    assert_eq!(normalized("2024.1.15.3").as_deref(), Some("2024.1.15.3"));
    assert_eq!(normalized("1.0+ubuntu-1").as_deref(), Some("1.0+ubuntu.1"));
    assert_eq!(normalized("1!2.0").as_deref(), Some("1!2.0"));
    assert_eq!(normalized("not-a-version"), None);
    assert_eq!(normalized("1.0+bad..local"), None);
}

#[test]
fn versions_follow_pep440_ordering() {
    let ordered = [
        "1.0.dev1",
        "1.0a1.dev1",
        "1.0a1",
        "1.0a2",
        "1.0b2",
        "1.0rc1",
        "1.0",
        "1.0+abc",
        "1.0+abc.5",
        "1.0+5",
        "1.0.post1.dev1",
        "1.0.post1",
        "1.0.post9",
        "1.0.post10",
        "1.0.1",
        "1.1",
        "2020.1.1.9",
        "2020.1.1.10",
        "1!0.1",
    ];
    for pair in ordered.windows(2) {
        assert_eq!(
            compare_versions(pair[0], pair[1]),
            Some(std::cmp::Ordering::Less),
            "{} should sort before {}",
            pair[0],
            pair[1]
        );
    }
    assert_eq!(compare_versions("1.0", "1.0.0"), Some(std::cmp::Ordering::Equal));
    assert_eq!(compare_versions("1.0.post10", "1.0.post9"), Some(std::cmp::Ordering::Greater));
    assert_eq!(compare_versions("weird", "weird"), Some(std::cmp::Ordering::Equal));
    assert_eq!(compare_versions("weird", "1.0"), None);
}

#[test]
fn range_specifiers_order_post_and_long_releases_numerically() {
    let spec = |text: &str| VersionSpecifier::parse(text).expect("specifier should parse");

    assert!(spec(">=1.0.post9").matches("1.0.post10"));
    assert!(!spec("<1.0.post9").matches("1.0.post10"));
    assert!(spec(">2020.1.1.9").matches("2020.1.1.10"));
    assert!(!spec(">=1.0a1").matches("1.0a1.dev1"));
    assert!(spec("==1.0.post1").matches("1.0.post1+local.7"));
}

#[test]
fn pinned_post_release_plans_downgrade_from_newer_post() {
    let parsed = manifest("pkg==1.0.post9\nlong==2020.1.1.10\n");
    let env = installed(&[("pkg", "1.0.post10"), ("long", "2020.1.1.9")]);

    let plan = build_upgrade_plan(&parsed, &env, &BTreeSet::new(), false);

    assert_eq!(plan.changes[0].action, PlannedAction::Downgrade);
    assert_eq!(plan.changes[1].action, PlannedAction::Upgrade);
}

#[test]
fn specifiers_match_like_pip() {
    let spec = |text: &str| VersionSpecifier::parse(text).expect("specifier should parse");

    assert!(spec("==1.2").matches("1.2.0"));
    assert!(spec("==1.2").matches("1.2+local"));
    assert!(!spec("==1.2+local").matches("1.2"));
    assert!(spec("==1.2.*").matches("1.2.9"));
    assert!(!spec("==1.2.*").matches("1.3"));
    assert!(spec("!=1.3").matches("1.4"));
    assert!(!spec("!=1.3").matches("1.3.0"));
    assert!(spec("~=1.4").matches("1.5.0"));
    assert!(!spec("~=1.4").matches("2.0"));
    assert!(spec("~=1.4.2").matches("1.4.9"));
    assert!(!spec("~=1.4.2").matches("1.5.0"));
    assert!(spec("===1.0-custom").matches("1.0-custom"));
    assert!(spec(">2.0").matches("2.1"));
    assert!(!spec("<2.0").matches("2.0"));

    let requirement = Requirement::parse("pkg>=2,<3")
        .expect("must parse")
        .expect("not blank");
    assert!(requirement.is_satisfied_by("2.9.1"));
    assert!(!requirement.is_satisfied_by("3.0"));
}

#[test]
fn upgrade_plan_classifies_each_requirement() {
    let parsed = manifest("alpha==2.0\nbeta==1.0\ngamma>=1.0\ndelta\nepsilon==3.1\n");
    let env = installed(&[
        ("alpha", "1.5"),
        ("beta", "1.2"),
        ("gamma", "1.4"),
        ("delta", "0.9"),
    ]);
    let outdated = BTreeSet::from(["gamma".to_string()]);

    let plan = build_upgrade_plan(&parsed, &env, &outdated, false);
    let actions = plan
        .changes
        .iter()
        .map(|change| (change.name(), change.action))
        .collect::<Vec<_>>();

    assert_eq!(
        actions,
        vec![
            ("alpha", PlannedAction::Upgrade),
            ("beta", PlannedAction::Downgrade),
            ("gamma", PlannedAction::Upgrade),
            ("delta", PlannedAction::Keep),
            ("epsilon", PlannedAction::Install),
        ]
    );
    assert_eq!(plan.pending_count(), 4);

    let (pinned, loose) = plan.split_batches();
    assert_eq!(pinned, vec!["alpha==2.0", "beta==1.0", "epsilon==3.1"]);
    assert_eq!(loose, vec!["gamma>=1.0"]);
}

#[test]
fn force_reinstall_plans_reinstall_for_satisfied_packages() {
    let parsed = manifest("alpha==2.0\ndelta\n");
    let env = installed(&[("alpha", "2.0.0"), ("delta", "0.9")]);

    let plan = build_upgrade_plan(&parsed, &env, &BTreeSet::new(), true);

    assert!(plan.force_reinstall);
    assert!(plan
        .changes
        .iter()
        .all(|change| change.action == PlannedAction::Reinstall));
}

#[test]
fn up_to_date_environment_plans_no_changes() {
    let parsed = manifest("alpha==2.0\ndelta>=0.5\n");
    let env = installed(&[("Alpha", "2.0"), ("delta", "0.9")]);

    let plan = build_upgrade_plan(&parsed, &env, &BTreeSet::new(), false);

    assert_eq!(plan.pending_count(), 0);
    assert_eq!(plan.changes[0].installed.as_deref(), Some("2.0"));
}

fn change(line: &str, installed: Option<&str>, action: PlannedAction) -> PlannedChange {
    PlannedChange {
        requirement: Requirement::parse(line)
            .expect("requirement should parse")
            .expect("requirement line is not blank"),
        installed: installed.map(str::to_string),
        action,
    }
}

#[test]
fn ledger_records_track_changes_and_status() {
    let alpha = change("alpha==2.0", Some("1.5"), PlannedAction::Upgrade);
    let upgraded = LedgerRecord::for_change(&alpha)
        .mark_ok(Some("2.0".to_string()), Some(ZERO_SHA256.to_string()));
    assert!(upgraded.changed);
    assert_eq!(upgraded.status, RecordStatus::Ok);

    let reinstalled =
        LedgerRecord::for_change(&change("delta", Some("0.9"), PlannedAction::Reinstall))
            .mark_ok(Some("0.9".to_string()), Some(ZERO_SHA256.to_string()));
    assert!(!reinstalled.changed);

    let kept = LedgerRecord::for_change(&change("delta", Some("0.9"), PlannedAction::Keep))
        .mark_skipped("up-to-date");
    assert_eq!(kept.new_version.as_deref(), Some("0.9"));
    assert_eq!(kept.status, RecordStatus::Skipped);

    let failed = LedgerRecord::for_change(&change("beta==1.0", None, PlannedAction::Install))
        .mark_failed("pip exited with status 1");
    assert!(!failed.changed);
    assert_eq!(failed.detail.as_deref(), Some("pip exited with status 1"));
}

#[test]
fn ledger_records_serialize_with_a_stable_shape() {
    let ok = LedgerRecord::for_change(&change("alpha==2.0", Some("1.5"), PlannedAction::Upgrade))
        .mark_ok(Some("2.0".to_string()), None);
    let skipped = LedgerRecord::for_change(&change("delta", Some("0.9"), PlannedAction::Keep))
        .mark_skipped("up-to-date");

    let keys = |record: &LedgerRecord| {
        serde_json::to_value(record)
            .expect("record serializes")
            .as_object()
            .expect("record is an object")
            .keys()
            .cloned()
            .collect::<Vec<_>>()
    };
    assert_eq!(keys(&ok), keys(&skipped));

    let value = serde_json::to_value(&ok).expect("record serializes");
    assert_eq!(value["status"], json!("ok"));
    assert_eq!(value["action"], json!("upgrade"));
    assert_eq!(value["previous_version"], json!("1.5"));
    assert_eq!(value["detail"], json!(null));
}

#[test]
fn ledger_builder_rejects_duplicate_records() {
    let mut builder =
        LedgerBuilder::new("run-1", RunMode::Upgrade, "requirements.txt", started_at());
    builder
        .push(LedgerRecord::for_change(&change("Foo_Bar", None, PlannedAction::Install)))
        .expect("first record is accepted");

    let err = builder
        .push(LedgerRecord::for_change(&change("foo-bar", None, PlannedAction::Install)))
        .expect_err("normalized duplicate must be rejected");
    assert!(err.to_string().contains("already has a record for 'foo-bar'"));
}

#[test]
fn ledger_builder_halts_and_summarizes() {
    let mut builder = LedgerBuilder::new(
        "0123456789abcdef0123456789abcdef",
        RunMode::ForceReinstall,
        "requirements.txt",
        started_at(),
    );
    builder
        .push(
            LedgerRecord::for_change(&change("alpha==2.0", Some("1.5"), PlannedAction::Upgrade))
                .mark_ok(Some("2.0".to_string()), Some(EMPTY_SHA256.to_string())),
        )
        .expect("push ok record");
    builder
        .push(
            LedgerRecord::for_change(&change("beta==1.0", None, PlannedAction::Install))
                .with_hash(ZERO_SHA256)
                .mark_failed("hash mismatch"),
        )
        .expect("push failed record");
    builder.halt(HaltReason::HashMismatch {
        package: "beta".to_string(),
        expected: vec![format!("sha256:{EMPTY_SHA256}")],
        actual: ZERO_SHA256.to_string(),
    });
    builder.halt(HaltReason::License {
        package: "gamma".to_string(),
        license: Some("AGPL-3.0".to_string()),
        matched: Some("agpl".to_string()),
    });

    assert!(builder
        .push(LedgerRecord::for_change(&change("gamma", None, PlannedAction::Install)))
        .is_err());

    let ledger = builder.finish(started_at() + Duration::milliseconds(1_250));

    assert_eq!(ledger.tool, TOOL_NAME);
    assert_eq!(ledger.duration_seconds, 1.25);
    assert_eq!(ledger.records.len(), 2);
    assert_eq!(ledger.halted.as_ref().map(HaltReason::package), Some("beta"));
    assert_eq!(
        ledger.summary,
        LedgerSummary {
            total: 2,
            ok: 1,
            failed: 1,
            skipped: 0,
            changed: 1,
        }
    );
    assert_eq!(ledger.exit_code(), 1);
    assert_eq!(ledger.changed_records().count(), 1);

    let value = serde_json::to_value(&ledger).expect("ledger serializes");
    assert_eq!(value["mode"], json!("force-reinstall"));
    assert_eq!(value["halted"]["kind"], json!("hash-mismatch"));
    assert_eq!(value["started_at"], json!("2026-03-14T09:26:53Z"));
}

#[test]
fn clean_ledger_exits_zero() {
    let mut builder = LedgerBuilder::new("run", RunMode::DryRun, "requirements.txt", started_at());
    builder
        .push(
            LedgerRecord::for_change(&change("delta", Some("0.9"), PlannedAction::Keep))
                .mark_skipped("up-to-date"),
        )
        .expect("push");
    let ledger = builder.finish(started_at());

    assert_eq!(ledger.exit_code(), 0);
    assert_eq!(ledger.summary.changed, 0);
    assert!(ledger.record("DELTA").is_some());
}

fn contract_payload() -> serde_json::Value {
    json!({
        "command": "pipward",
        "parameters": {
            "packages": ["x_make_markdown_x", "x_make_pypi_x"],
            "repo_parent_root": "/srv/repos",
            "published_versions": {
                "x_make_markdown_x": "1.4.0",
                "x_make_pypi_x": null
            },
            "published_artifacts": {
                "x_make_markdown_x": {
                    "main": "dist/x_make_markdown_x-1.4.0-py3-none-any.whl",
                    "anc": ["dist/x_make_markdown_x-1.4.0.tar.gz"],
                    "built_by": "ci"
                }
            },
            "context": {
                "dry_run": true,
                "publish_opts": { "use_user": "Yes" },
                "trace_id": "abc"
            },
            "cloner": { "target_dir": "/srv/repos" }
        }
    })
}

#[test]
fn contract_input_parses_and_exposes_flags() {
    let raw = contract_payload().to_string();
    let input = parse_contract_input(&raw).expect("payload should be accepted");

    assert!(input.dry_run());
    assert!(input.use_user());
    let artifact = &input.parameters.published_artifacts["x_make_markdown_x"];
    assert_eq!(artifact.anc.len(), 1);
    assert_eq!(artifact.extra.get("built_by"), Some(&json!("ci")));

    let manifest = input.manifest().expect("manifest builds");
    assert_eq!(
        manifest.requirements[0].install_spec(),
        "x_make_markdown_x==1.4.0"
    );
    assert_eq!(manifest.requirements[1].pinned_version(), None);
}

#[test]
fn contract_input_rejects_unknown_fields() {
    let mut payload = contract_payload();
    payload["parameters"]["surprise"] = json!(true);

    let failure = parse_contract_input(&payload.to_string()).expect_err("unknown field");
    assert_eq!(failure.status, FailureStatus::Failure);
    assert_eq!(failure.message, "input payload failed validation");
    assert!(failure.details["error"]
        .as_str()
        .expect("error detail is a string")
        .contains("surprise"));
}

#[test]
fn contract_input_requires_repo_parent_root() {
    let mut payload = contract_payload();
    payload["parameters"]["repo_parent_root"] = json!("  ");

    let failure = parse_contract_input(&payload.to_string()).expect_err("empty root");
    assert_eq!(failure.message, "repo_parent_root is required");
    assert_eq!(failure.details["field"], json!("repo_parent_root"));

    let serialized = serde_json::to_value(&failure).expect("failure serializes");
    assert_eq!(serialized["status"], json!("failure"));
}

#[test]
fn contract_input_rejects_wrong_command_and_empty_artifacts() {
    let mut payload = contract_payload();
    payload["command"] = json!("something_else");
    let failure = parse_contract_input(&payload.to_string()).expect_err("wrong command");
    assert_eq!(failure.details["path"], json!("command"));

    let mut payload = contract_payload();
    payload["parameters"]["published_artifacts"]["x_make_markdown_x"]["main"] = json!("");
    let failure = parse_contract_input(&payload.to_string()).expect_err("empty main");
    assert_eq!(
        failure.details["path"],
        json!("parameters.published_artifacts.x_make_markdown_x.main")
    );
}

#[test]
fn run_report_records_errors_and_duration() {
    let execution = ExecutionDetail {
        package_manager: "python3 -m pip".to_string(),
        mode: RunMode::Upgrade,
        pinned: vec!["alpha==2.0".to_string()],
        loose: Vec::new(),
        retry: None,
        audit: None,
    };
    let mut report = RunReport::new("run", started_at(), ReportInputs::default(), execution);
    assert_eq!(report.status, ReportStatus::Success);
    assert_eq!(report.result.status, ResultStatus::Skipped);

    report.record_error("execution", "pip is not installed");
    let report = report.finish(started_at() + Duration::seconds(2));

    assert_eq!(report.status, ReportStatus::Error);
    assert_eq!(report.duration_seconds, 2.0);
    let value = serde_json::to_value(&report).expect("report serializes");
    assert_eq!(value["errors"][0]["type"], json!("execution"));
    assert_eq!(value["tool"], json!("pipward"));
    assert_eq!(value["result"]["status"], json!("skipped"));
}

#[test]
fn skipped_result_serializes_only_status_and_reason() {
    let skipped = serde_json::to_value(RunResult::skipped("no packages after normalization"))
        .expect("result serializes");
    assert_eq!(
        skipped,
        json!({"status": "skipped", "reason": "no packages after normalization"})
    );
    let parsed: RunResult = serde_json::from_value(skipped).expect("skipped result parses");
    assert_eq!(parsed, RunResult::skipped("no packages after normalization"));

    let completed = RunResult {
        status: ResultStatus::Completed,
        ..RunResult::skipped("unused")
    };
    let value = serde_json::to_value(&completed).expect("result serializes");
    let object = value.as_object().expect("result is an object");
    assert_eq!(object.len(), 8);
    assert_eq!(value["any_failures"], json!(false));
    assert_eq!(value["mismatches"], json!([]));
    assert_eq!(value["verification"], json!(null));
}
