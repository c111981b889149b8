// End-to-end pipeline tests
//
// Each test provisions a target into a temporary root directory. Commands
// go to FakeHost, which records them and emulates their filesystem effects;
// release listings and downloads come from StubHttp.

mod common;

use std::fs;
use std::os::unix::fs::PermissionsExt;

use common::{FakeHost, StubHttp, context, files_under, sha256_hex};
use debprov::targets::node_exporter::NodeExporter;
use debprov::targets::postgres::PostgresRepo;
use debprov::targets::swapfile::Swapfile;
use debprov::targets::upgrade::UpgradeDebian;
use debprov::targets::xray::Xray;
use debprov::{Outcome, PlanningRunner, ProvisionError, RecordingRunner, provision};

const NODE_EXPORTER_TARBALL: &str = "node_exporter-1.8.0.linux-amd64.tar.gz";
const TARBALL: &[u8] = b"node exporter tarball";

fn node_exporter_release() -> StubHttp {
    let sums = format!(
        "{}  {}\n{}  node_exporter-1.8.0.linux-arm64.tar.gz\n",
        sha256_hex(TARBALL),
        NODE_EXPORTER_TARBALL,
        "0".repeat(64)
    );
    StubHttp::default().release(
        "prometheus/node_exporter",
        "v1.8.0",
        &[
            ("node_exporter-1.8.0.darwin-amd64.tar.gz", b"darwin"),
            (NODE_EXPORTER_TARBALL, TARBALL),
            ("node_exporter-1.8.0.linux-arm64.tar.gz", b"arm64"),
            ("sha256sums.txt", sums.as_bytes()),
        ],
    )
}

#[test]
fn test_node_exporter_end_to_end() {
    let root = tempfile::tempdir().unwrap();
    let host = FakeHost::new().archive(&["node_exporter", "LICENSE"]);
    let http = node_exporter_release();
    let ctx = context(root.path(), &host, &http);

    let report = provision(&NodeExporter, &ctx).unwrap();
    assert_eq!(report.outcome, Outcome::Provisioned);
    assert_eq!(report.version.as_deref(), Some("1.8.0"));
    assert!(report.installed_dependencies.is_empty());

    let binary = root.path().join("usr/local/bin/node_exporter");
    let mode = fs::metadata(&binary).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);

    let unit = fs::read_to_string(root.path().join("etc/systemd/system/node_exporter.service")).unwrap();
    assert!(unit.contains("ExecStart=/usr/local/bin/node_exporter\n"));

    let lines = host.command_lines();
    let position = |wanted: &str| {
        lines
            .iter()
            .position(|l| l == wanted)
            .unwrap_or_else(|| panic!("missing `{}` in {:?}", wanted, lines))
    };
    let reload = position("systemctl daemon-reload");
    let start = position("systemctl start node_exporter");
    let enable = position("systemctl enable node_exporter");
    let active = position("systemctl is-active node_exporter");
    assert!(reload < start && start < enable && enable < active);
}

#[test]
fn test_missing_tar_is_installed_first() {
    let root = tempfile::tempdir().unwrap();
    let host = FakeHost::with(RecordingRunner::new().missing("tar")).archive(&["node_exporter"]);
    let http = node_exporter_release();
    let ctx = context(root.path(), &host, &http);

    let report = provision(&NodeExporter, &ctx).unwrap();
    assert_eq!(report.installed_dependencies, vec!["tar"]);
    let lines = host.command_lines();
    assert_eq!(lines[0], "apt-get update");
    assert_eq!(lines[1], "apt-get install -y tar");
}

#[test]
fn test_zero_matching_assets_aborts_without_changes() {
    let root = tempfile::tempdir().unwrap();
    let host = FakeHost::new().archive(&["node_exporter"]);
    let http = StubHttp::default().release(
        "prometheus/node_exporter",
        "v1.8.0",
        &[
            ("node_exporter-1.8.0.darwin-amd64.tar.gz", b"darwin"),
            ("node_exporter-1.8.0.netbsd-amd64.tar.gz", b"netbsd"),
        ],
    );
    let ctx = context(root.path(), &host, &http);

    let err = provision(&NodeExporter, &ctx).unwrap_err();
    assert!(matches!(err, ProvisionError::ArtifactResolution(_)));
    assert!(err.to_string().contains("linux-amd64.tar.gz"));
    assert_eq!(err.exit_code(), 1);
    assert!(files_under(root.path()).is_empty());
    assert!(host.command_lines().is_empty());
    assert_eq!(http.downloads(), 0);
}

#[test]
fn test_checksum_mismatch_installs_nothing() {
    let root = tempfile::tempdir().unwrap();
    let host = FakeHost::new().archive(&["node_exporter"]);
    let sums = format!("{}  {}\n", "f".repeat(64), NODE_EXPORTER_TARBALL);
    let http = StubHttp::default().release(
        "prometheus/node_exporter",
        "v1.8.0",
        &[
            (NODE_EXPORTER_TARBALL, TARBALL),
            ("sha256sums.txt", sums.as_bytes()),
        ],
    );
    let ctx = context(root.path(), &host, &http);

    let err = provision(&NodeExporter, &ctx).unwrap_err();
    assert!(matches!(err, ProvisionError::ArtifactIntegrity(_)));
    assert!(files_under(root.path()).is_empty());
}

#[test]
fn test_second_run_is_skipped_unless_forced() {
    let root = tempfile::tempdir().unwrap();
    let host = FakeHost::new().archive(&["node_exporter"]);
    let http = node_exporter_release();
    let mut ctx = context(root.path(), &host, &http);

    provision(&NodeExporter, &ctx).unwrap();
    assert_eq!(http.downloads(), 1);

    let again = provision(&NodeExporter, &ctx).unwrap();
    assert_eq!(again.outcome, Outcome::AlreadyProvisioned);
    assert_eq!(http.downloads(), 1);

    ctx.force = true;
    let forced = provision(&NodeExporter, &ctx).unwrap();
    assert_eq!(forced.outcome, Outcome::Provisioned);
    assert_eq!(http.downloads(), 2);
}

#[test]
fn test_start_failure_stops_before_enable() {
    let root = tempfile::tempdir().unwrap();
    let host = FakeHost::with(
        RecordingRunner::new().fail(&["systemctl", "start"], "Job for node_exporter.service failed"),
    )
    .archive(&["node_exporter"]);
    let http = node_exporter_release();
    let ctx = context(root.path(), &host, &http);

    let err = provision(&NodeExporter, &ctx).unwrap_err();
    assert!(matches!(
        err,
        ProvisionError::ServiceActivation { stage: "start", .. }
    ));
    assert!(!host.command_lines().iter().any(|l| l.starts_with("systemctl enable")));
}

#[test]
fn test_inactive_service_exits_with_verification_code() {
    let root = tempfile::tempdir().unwrap();
    let mut host = FakeHost::new().archive(&["node_exporter"]);
    host.service_state = "failed".to_string();
    let http = node_exporter_release();
    let ctx = context(root.path(), &host, &http);

    let err = provision(&NodeExporter, &ctx).unwrap_err();
    assert!(matches!(err, ProvisionError::Verification(_)));
    assert_eq!(err.exit_code(), debprov::error::VERIFICATION_EXIT_CODE);
    let polls = host
        .command_lines()
        .iter()
        .filter(|l| l.as_str() == "systemctl is-active node_exporter")
        .count();
    assert_eq!(polls, 3);
}

#[test]
fn test_dry_run_leaves_root_untouched() {
    let root = tempfile::tempdir().unwrap();
    let host = FakeHost::new().archive(&["node_exporter"]);
    let http = node_exporter_release();
    let mut ctx = context(root.path(), &host, &http);
    ctx.dry_run = true;

    let report = provision(&NodeExporter, &ctx).unwrap();
    assert_eq!(report.outcome, Outcome::Planned);
    assert!(files_under(root.path()).is_empty());
    assert_eq!(http.downloads(), 0);
    assert!(host.command_lines().contains(&"systemctl start node_exporter".to_string()));
    assert!(!host.command_lines().iter().any(|l| l.contains("is-active")));
}

#[test]
fn test_dry_run_plans_missing_dependencies() {
    let root = tempfile::tempdir().unwrap();
    let host = FakeHost::with(RecordingRunner::new().missing("tar"));
    let planner = PlanningRunner::new(&host);
    let http = node_exporter_release();
    let mut ctx = context(root.path(), &host, &http);
    ctx.runner = &planner;
    ctx.dry_run = true;

    let report = provision(&NodeExporter, &ctx).unwrap();
    assert_eq!(report.outcome, Outcome::Planned);
    assert_eq!(report.installed_dependencies, vec!["tar"]);
    let planned = planner.command_lines();
    assert_eq!(planned[0], "apt-get update");
    assert_eq!(planned[1], "apt-get install -y tar");
    assert!(host.command_lines().is_empty());
    assert!(files_under(root.path()).is_empty());
}

#[test]
fn test_xray_keeps_operator_config() {
    let root = tempfile::tempdir().unwrap();
    let host = FakeHost::new().archive(&["xray", "geoip.dat", "geosite.dat"]);
    let zip: &[u8] = b"xray zip";
    let dgst = format!("MD5= 00\nSHA2-256= {}\n", sha256_hex(zip));
    let http = StubHttp::default().release(
        "XTLS/Xray-core",
        "v25.1.30",
        &[
            ("Xray-linux-arm64-v8a.zip", b"arm"),
            ("Xray-linux-64.zip", zip),
            ("Xray-linux-64.zip.dgst", dgst.as_bytes()),
        ],
    );
    let ctx = context(root.path(), &host, &http);
    let config = root.path().join("usr/local/etc/xray/config.json");
    fs::create_dir_all(config.parent().unwrap()).unwrap();
    fs::write(&config, "{\"inbounds\": []}").unwrap();

    let report = provision(&Xray, &ctx).unwrap();
    assert_eq!(report.version.as_deref(), Some("25.1.30"));
    assert_eq!(fs::read_to_string(&config).unwrap(), "{\"inbounds\": []}");
    assert!(root.path().join("usr/local/share/xray/geosite.dat").is_file());
    assert!(root.path().join("usr/local/bin/xray").is_file());
}

#[test]
fn test_swapfile_twice() {
    let root = tempfile::tempdir().unwrap();
    let host = FakeHost::new();
    let http = StubHttp::default();
    let ctx = context(root.path(), &host, &http);
    let fstab = root.path().join("etc/fstab");
    fs::create_dir_all(fstab.parent().unwrap()).unwrap();
    fs::write(&fstab, "UUID=1234 / ext4 errors=remount-ro 0 1\n").unwrap();

    let report = provision(&Swapfile { size_mb: 1024 }, &ctx).unwrap();
    assert_eq!(report.outcome, Outcome::Provisioned);

    let swapfile = root.path().join("swapfile");
    let meta = fs::metadata(&swapfile).unwrap();
    assert_eq!(meta.len(), 1024 * 1024 * 1024);
    assert_eq!(meta.permissions().mode() & 0o777, 0o600);

    let swap = swapfile.display().to_string();
    let lines = host.command_lines();
    assert!(lines.contains(&format!("mkswap {}", swap)));
    assert!(lines.contains(&format!("swapon {}", swap)));
    assert_eq!(
        fs::read_to_string(&fstab).unwrap(),
        "UUID=1234 / ext4 errors=remount-ro 0 1\n/swapfile none swap sw 0 0\n"
    );
    assert!(
        fs::read_to_string(root.path().join("etc/sysctl.d/99-swapfile.conf"))
            .unwrap()
            .contains("vm.swappiness = 10\n")
    );

    let err = provision(&Swapfile { size_mb: 1024 }, &ctx).unwrap_err();
    assert!(matches!(err, ProvisionError::AlreadyProvisioned(_)));
    assert_eq!(err.exit_code(), 1);
    let fstab_text = fs::read_to_string(&fstab).unwrap();
    assert_eq!(fstab_text.matches("/swapfile").count(), 1);
}

#[test]
fn test_postgres_repo_with_server() {
    let root = tempfile::tempdir().unwrap();
    let host = FakeHost::new();
    let http = StubHttp::default().file(
        "https://www.postgresql.org/media/keys/ACCESS_KEY.asc",
        b"-----BEGIN PGP PUBLIC KEY BLOCK-----",
    );
    let ctx = context(root.path(), &host, &http);

    let target = PostgresRepo {
        install: Some("16".to_string()),
    };
    let report = provision(&target, &ctx).unwrap();
    assert_eq!(report.outcome, Outcome::Provisioned);

    let source = fs::read_to_string(root.path().join("etc/apt/sources.list.d/pgdg.sources")).unwrap();
    assert_eq!(
        source,
        "Types: deb\n\
         URIs: https://apt.postgresql.org/pub/repos/apt\n\
         Suites: bookworm-pgdg\n\
         Components: main\n\
         Signed-By: /etc/apt/keyrings/postgresql.gpg\n"
    );
    let keyring = root.path().join("etc/apt/keyrings/postgresql.gpg");
    assert_eq!(fs::metadata(&keyring).unwrap().permissions().mode() & 0o777, 0o644);

    let lines = host.command_lines();
    assert!(lines.iter().any(|l| l.starts_with("gpg --dearmor --yes -o ")));
    assert!(lines.contains(&"apt-get install -y postgresql-16".to_string()));
    assert!(lines.contains(&"systemctl enable postgresql".to_string()));
}

#[test]
fn test_debian_upgrade_rewrites_sources_and_verifies() {
    let root = tempfile::tempdir().unwrap();
    let os_release = root.path().join("etc/os-release");
    let mut host = FakeHost::new();
    host.os_release_after_upgrade = Some((
        os_release.clone(),
        "ID=debian\nVERSION_ID=\"13\"\nVERSION_CODENAME=trixie\n".to_string(),
    ));
    let http = StubHttp::default();
    let ctx = context(root.path(), &host, &http);

    let sources = root.path().join("etc/apt/sources.list");
    fs::create_dir_all(sources.parent().unwrap()).unwrap();
    fs::write(&os_release, common::BOOKWORM).unwrap();
    fs::write(
        &sources,
        "deb http://deb.debian.org/debian bookworm main\n\
         deb http://security.debian.org/debian-security bookworm-security main\n",
    )
    .unwrap();

    let report = provision(&UpgradeDebian, &ctx).unwrap();
    assert_eq!(report.outcome, Outcome::Provisioned);
    assert!(report.details[0].contains("reboot"));
    assert_eq!(
        fs::read_to_string(&sources).unwrap(),
        "deb http://deb.debian.org/debian trixie main\n\
         deb http://security.debian.org/debian-security trixie-security main\n"
    );
    assert!(root.path().join("etc/apt/sources.list.bak").is_file());
}
