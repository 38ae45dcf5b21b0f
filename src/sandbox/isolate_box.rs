//! Isolate box management
//!
//! Each run gets its own box. Programs see only the box directory, read-only
//! system directories and a private `/tmp`; stdio is inherited so the process
//! driver can stream it.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::config::{get_config, next_box_id};
use super::meta::{parse_meta, IsolateMeta};

pub const ISOLATE: &str = "isolate";

/// Box directory as the sandboxed program sees it
pub const BOX_ROOT: &str = "/box";

/// Host directories bound into every box
const DIR_BINDINGS: &[&str] = &[
    "--dir=/usr",
    "--dir=/lib",
    "--dir=/lib64:maybe",
    "--dir=/etc:noexec",
    "--dir=/tmp:tmp",
];

static USE_CGROUPS: OnceLock<bool> = OnceLock::new();
static AVAILABLE: OnceLock<bool> = OnceLock::new();

async fn can_init(cgroups: bool) -> bool {
    let mut init = vec!["--box-id", "99"];
    if cgroups {
        init.push("--cg");
    }
    init.push("--init");

    let result = Command::new(ISOLATE).args(&init).output().await;

    let _ = Command::new(ISOLATE)
        .args(["--box-id", "99", "--cleanup"])
        .output()
        .await;

    result.map(|r| r.status.success()).unwrap_or(false)
}

/// Check if isolate cgroups are available
pub async fn is_cgroups_available() -> bool {
    if let Some(value) = USE_CGROUPS.get() {
        return *value;
    }
    let available = can_init(true).await;
    let _ = USE_CGROUPS.set(available);
    available
}

/// Check if isolate can create boxes at all
pub async fn is_available() -> bool {
    if let Some(value) = AVAILABLE.get() {
        return *value;
    }
    let available = is_cgroups_available().await || can_init(false).await;
    let _ = AVAILABLE.set(available);
    available
}

pub async fn ensure_available() -> Result<()> {
    if !is_available().await {
        anyhow::bail!("Isolate is required to run learner programs but no box could be initialized");
    }
    if !is_cgroups_available().await {
        warn!("Isolate cgroups unavailable, memory is limited per process only");
    }
    Ok(())
}

/// Resource limits for one sandboxed command
#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    /// CPU time
    pub time: Duration,
    pub wall_time: Duration,
    pub memory_mb: u32,
    pub processes: u32,
    pub open_files: u32,
    pub fsize_kb: u32,
}

impl Limits {
    /// Limits for a learner program allowed `timeout` of wall-clock time
    pub fn for_run(timeout: Duration) -> Self {
        let config = get_config();
        Self {
            time: timeout,
            wall_time: timeout + Duration::from_secs(1),
            memory_mb: config.memory_limit_mb,
            processes: config.processes,
            open_files: 64,
            fsize_kb: 65_536,
        }
    }

    pub fn for_compile() -> Self {
        let config = get_config();
        let time = Duration::from_millis(config.compile_time_limit_ms as u64);
        Self {
            time,
            wall_time: time * 2 + Duration::from_secs(1),
            memory_mb: config.compile_memory_limit_mb,
            processes: 64,
            open_files: 256,
            fsize_kb: 262_144,
        }
    }
}

/// Isolate box owned by one run; cleaned up when dropped
#[derive(Debug)]
pub struct IsolateBox {
    box_id: u32,
    box_path: PathBuf,
    use_cgroups: bool,
    cleaned: bool,
}

impl IsolateBox {
    /// Initialize a box with the next free ID for this worker
    pub async fn open() -> Result<Self> {
        Self::new(next_box_id(), is_cgroups_available().await).await
    }

    pub async fn new(box_id: u32, use_cgroups: bool) -> Result<Self> {
        // A box left over from a crashed run
        let _ = Command::new(ISOLATE)
            .args(["--box-id", &box_id.to_string(), "--cleanup"])
            .output()
            .await;

        let box_id_str = box_id.to_string();
        let mut args = vec!["--box-id", &box_id_str];
        if use_cgroups {
            args.push("--cg");
        }
        args.push("--init");

        let output = Command::new(ISOLATE)
            .args(&args)
            .output()
            .await
            .context("Failed to run isolate --init")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to initialize isolate box {}: {}", box_id, stderr.trim());
        }

        let box_path = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        debug!("Initialized isolate box {} at {:?} (cgroups: {})", box_id, box_path, use_cgroups);

        Ok(Self {
            box_id,
            box_path,
            use_cgroups,
            cleaned: false,
        })
    }

    pub fn box_id(&self) -> u32 {
        self.box_id
    }

    /// Host path of the program's working directory
    pub fn work_dir(&self) -> PathBuf {
        self.box_path.join("box")
    }

    pub fn meta_path(&self) -> PathBuf {
        PathBuf::from(format!("/tmp/isolate_meta_{}.txt", self.box_id))
    }

    /// Write a file into the box, relative to its working directory
    pub async fn write_file(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.work_dir().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write {:?}", path))?;
        Ok(path)
    }

    /// Full isolate command line that runs `command` inside the box
    pub fn command(&self, command: &[String], limits: &Limits, env: &[(&str, &str)]) -> Vec<String> {
        let mut args = vec![
            ISOLATE.to_string(),
            "--box-id".to_string(),
            self.box_id.to_string(),
            "--silent".to_string(),
        ];

        let memory_limit_kb = limits.memory_mb * 1024;
        if self.use_cgroups {
            args.push("--cg".to_string());
            args.push(format!("--cg-mem={}", memory_limit_kb));
        } else {
            args.push(format!("--mem={}", memory_limit_kb));
        }

        args.extend([
            format!("--time={}", limits.time.as_secs_f64()),
            format!("--wall-time={}", limits.wall_time.as_secs_f64()),
            format!("--meta={}", self.meta_path().display()),
            format!("--processes={}", limits.processes),
            format!("--open-files={}", limits.open_files),
            format!("--fsize={}", limits.fsize_kb),
        ]);
        args.extend(DIR_BINDINGS.iter().map(|d| d.to_string()));
        args.push("--env=PATH=/usr/local/bin:/usr/bin:/bin".to_string());
        args.push(format!("--env=HOME={}", BOX_ROOT));
        args.extend(env.iter().map(|(k, v)| format!("--env={}={}", k, v)));

        args.push("--run".to_string());
        args.push("--".to_string());

        let mut cmd_iter = command.iter();
        if let Some(cmd) = cmd_iter.next() {
            if cmd.starts_with('/') || cmd.starts_with("./") {
                args.push(cmd.clone());
            } else {
                args.push(format!("/usr/bin/{}", cmd));
            }
            args.extend(cmd_iter.cloned());
        }

        args
    }

    /// Read and remove the meta file of the last command
    pub async fn take_meta(&self) -> Option<IsolateMeta> {
        take_meta(&self.meta_path()).await
    }

    pub async fn cleanup(mut self) -> Result<()> {
        self.cleaned = true;
        let _ = fs::remove_file(self.meta_path()).await;
        Command::new(ISOLATE)
            .args(["--box-id", &self.box_id.to_string(), "--cleanup"])
            .output()
            .await?;
        info!("Cleaned up isolate box {}", self.box_id);
        Ok(())
    }
}

impl Drop for IsolateBox {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        let box_id = self.box_id.to_string();
        let meta = self.meta_path();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = fs::remove_file(meta).await;
                    let _ = Command::new(ISOLATE)
                        .args(["--box-id", &box_id, "--cleanup"])
                        .output()
                        .await;
                });
            }
            Err(_) => {
                let _ = std::fs::remove_file(meta);
                let _ = std::process::Command::new(ISOLATE)
                    .args(["--box-id", &box_id, "--cleanup"])
                    .output();
            }
        }
    }
}

pub async fn take_meta(path: &Path) -> Option<IsolateMeta> {
    let content = fs::read_to_string(path).await.ok()?;
    let _ = fs::remove_file(path).await;
    Some(parse_meta(&content))
}
