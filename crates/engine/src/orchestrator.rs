// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Platform build orchestration.
//!
//! One orchestrator instance drives a full build for one environment:
//! source discovery, incremental-compilation decisions against the file
//! cache, compile fan-out through the shared queue, then link and image
//! conversion under the watchdog runner. AVR and ESP32 differ in toolchain
//! and image format; the pipeline is shared.

use crate::config::{EnvConfig, Platform};
use crate::error_collector::{BuildError, ErrorCollector, Phase, Severity};
use crate::queue::{CompilationQueue, CompileJob, JobHandle};
use fb_adapters::{SubprocessError, WatchdogCommand, WatchdogRunner};
use fb_storage::{hash_file, hash_file_set, hash_flags, FileCache};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Linkers are quiet by nature; give them a long inactivity window.
const LINK_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
const LINK_TOTAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Version probe used by dependency installation checks.
const PROBE_TOTAL_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Flasher bounds. Flashers print progress continuously, so a quiet flasher
/// is a stuck flasher.
const UPLOAD_TOTAL_TIMEOUT: Duration = Duration::from_secs(300);
const UPLOAD_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Orchestrator failures that are not ordinary build errors.
///
/// Compile and link failures are collected and reported through the
/// [`ErrorCollector`]; these errors are for broken environments.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("toolchain program not found: {0}")]
    ToolchainMissing(String),

    #[error("no source files found under {0}")]
    NoSources(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("compilation queue unavailable: {0}")]
    Queue(#[from] crate::queue::QueueError),
}

/// Resolved toolchain for one platform/environment.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub compiler: PathBuf,
    pub linker: PathBuf,
    /// Image conversion tool; None leaves the linked ELF as the firmware
    pub objcopy: Option<PathBuf>,
    /// Extension of the flashable image (`hex` for AVR, `bin` for ESP32)
    pub image_ext: &'static str,
    pub base_flags: Vec<String>,
    pub link_flags: Vec<String>,
    pub include_paths: Vec<PathBuf>,
}

/// Supplies toolchains and verifies they are installed.
///
/// Toolchain download/extraction is an external collaborator; the daemon
/// only consumes this interface.
#[async_trait::async_trait]
pub trait ToolchainProvider: Send + Sync {
    fn toolchain(
        &self,
        platform: Platform,
        env: &EnvConfig,
        project_dir: &Path,
    ) -> Result<Toolchain, OrchestratorError>;

    /// Verify the platform's tools are present, reporting progress lines.
    async fn ensure_installed(
        &self,
        platform: Platform,
        env: &EnvConfig,
        runner: &WatchdogRunner,
        progress: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<(), OrchestratorError>;

    /// Watchdog command that flashes `firmware` to the device.
    ///
    /// `port` is None when the flasher should auto-detect.
    fn flash_command(
        &self,
        platform: Platform,
        env: &EnvConfig,
        port: Option<&str>,
        firmware: &Path,
    ) -> Result<WatchdogCommand, OrchestratorError>;
}

/// Resolves toolchains from the host environment.
///
/// `FBUILD_AVR_GXX` / `FBUILD_ESP32_GXX` override the compiler path per
/// platform; otherwise the conventional cross-compiler names are expected
/// on PATH.
#[derive(Default, Clone)]
pub struct HostToolchainProvider;

impl HostToolchainProvider {
    fn compiler_for(platform: Platform) -> PathBuf {
        let (var, default) = match platform {
            Platform::AtmelAvr => ("FBUILD_AVR_GXX", "avr-g++"),
            Platform::Espressif32 => ("FBUILD_ESP32_GXX", "xtensa-esp32-elf-g++"),
        };
        std::env::var(var)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(default))
    }

    fn objcopy_for(platform: Platform) -> PathBuf {
        let (var, default) = match platform {
            Platform::AtmelAvr => ("FBUILD_AVR_OBJCOPY", "avr-objcopy"),
            Platform::Espressif32 => ("FBUILD_ESP32_OBJCOPY", "xtensa-esp32-elf-objcopy"),
        };
        std::env::var(var)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(default))
    }

    fn mcu_flags(env: &EnvConfig) -> Vec<String> {
        match env.board.as_deref() {
            Some("uno") => vec!["-mmcu=atmega328p".to_string(), "-DF_CPU=16000000L".to_string()],
            Some("megaatmega2560") => {
                vec!["-mmcu=atmega2560".to_string(), "-DF_CPU=16000000L".to_string()]
            }
            Some(board) => vec![format!("-DBOARD_{}", board.to_uppercase())],
            None => Vec::new(),
        }
    }
}

#[async_trait::async_trait]
impl ToolchainProvider for HostToolchainProvider {
    fn toolchain(
        &self,
        platform: Platform,
        env: &EnvConfig,
        _project_dir: &Path,
    ) -> Result<Toolchain, OrchestratorError> {
        let compiler = Self::compiler_for(platform);
        let mut base_flags = vec!["-Os".to_string(), "-Wall".to_string()];
        base_flags.extend(Self::mcu_flags(env));

        let (image_ext, link_flags) = match platform {
            Platform::AtmelAvr => ("hex", Self::mcu_flags(env)),
            Platform::Espressif32 => ("bin", Vec::new()),
        };

        Ok(Toolchain {
            linker: compiler.clone(),
            objcopy: Some(Self::objcopy_for(platform)),
            compiler,
            image_ext,
            base_flags,
            link_flags,
            include_paths: Vec::new(),
        })
    }

    async fn ensure_installed(
        &self,
        platform: Platform,
        _env: &EnvConfig,
        runner: &WatchdogRunner,
        progress: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<(), OrchestratorError> {
        let compiler = Self::compiler_for(platform);
        let msg = format!("Checking {} toolchain...", platform);
        progress(&msg);

        let cmd = WatchdogCommand::new(&compiler)
            .args(["--version"])
            .total_timeout(PROBE_TOTAL_TIMEOUT)
            .idle_timeout(PROBE_IDLE_TIMEOUT);

        let (_, result) = runner.run(cmd).await;
        match result {
            Ok(output) if output.success() => {
                let msg = format!(
                    "{} toolchain present ({})",
                    platform,
                    output.stdout.lines().next().unwrap_or("").trim()
                );
                progress(&msg);
                Ok(())
            }
            _ => Err(OrchestratorError::ToolchainMissing(
                compiler.display().to_string(),
            )),
        }
    }

    fn flash_command(
        &self,
        platform: Platform,
        env: &EnvConfig,
        port: Option<&str>,
        firmware: &Path,
    ) -> Result<WatchdogCommand, OrchestratorError> {
        let cmd = match platform {
            Platform::AtmelAvr => {
                let flasher = std::env::var("FBUILD_AVRDUDE")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("avrdude"));
                let mcu = match env.board.as_deref() {
                    Some("megaatmega2560") => "atmega2560",
                    _ => "atmega328p",
                };
                let mut cmd = WatchdogCommand::new(flasher).args([
                    "-p".to_string(),
                    mcu.to_string(),
                    "-c".to_string(),
                    "arduino".to_string(),
                ]);
                if let Some(port) = port {
                    cmd = cmd.args(["-P".to_string(), port.to_string()]);
                }
                if let Some(speed) = env.upload_speed {
                    cmd = cmd.args(["-b".to_string(), speed.to_string()]);
                }
                cmd.args([
                    "-U".to_string(),
                    format!("flash:w:{}:i", firmware.display()),
                ])
            }
            Platform::Espressif32 => {
                let flasher = std::env::var("FBUILD_ESPTOOL")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("esptool.py"));
                let mut cmd = WatchdogCommand::new(flasher);
                if let Some(port) = port {
                    cmd = cmd.args(["--port".to_string(), port.to_string()]);
                }
                if let Some(speed) = env.upload_speed {
                    cmd = cmd.args(["--baud".to_string(), speed.to_string()]);
                }
                cmd.args([
                    "write_flash".to_string(),
                    "0x10000".to_string(),
                    firmware.display().to_string(),
                ])
            }
        };

        Ok(cmd
            .total_timeout(UPLOAD_TOTAL_TIMEOUT)
            .idle_timeout(UPLOAD_IDLE_TIMEOUT))
    }
}

/// Result of one build.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub success: bool,
    pub firmware_path: Option<PathBuf>,
    pub firmware_hash: Option<String>,
    pub source_hash: Option<String>,
    pub build_flags_hash: String,
    pub compiled_units: usize,
    pub skipped_units: usize,
    pub message: String,
}

/// Shared subsystems the orchestrator borrows from the daemon context.
pub struct BuildDeps<'a> {
    pub queue: &'a CompilationQueue,
    pub file_cache: &'a FileCache,
    pub errors: &'a ErrorCollector,
    pub runner: &'a WatchdogRunner,
}

/// Drives a build for one platform family.
pub struct BuildOrchestrator {
    platform: Platform,
    toolchain: Toolchain,
    verbose: bool,
}

impl BuildOrchestrator {
    pub fn new(
        platform: Platform,
        provider: &dyn ToolchainProvider,
        env: &EnvConfig,
        project_dir: &Path,
        verbose: bool,
    ) -> Result<Self, OrchestratorError> {
        let toolchain = provider.toolchain(platform, env, project_dir)?;
        Ok(Self {
            platform,
            toolchain,
            verbose,
        })
    }

    /// Build `project_dir` for `env_name`.
    ///
    /// Compile failures are collected, not returned; the outcome's `success`
    /// flag reflects them. `jobs` bounds this request's in-flight submissions
    /// on top of the shared pool.
    pub async fn build(
        &self,
        project_dir: &Path,
        env_name: &str,
        env: &EnvConfig,
        clean: bool,
        jobs: Option<usize>,
        deps: &BuildDeps<'_>,
    ) -> Result<BuildOutcome, OrchestratorError> {
        let out_dir = project_dir.join(".fbuild").join("build").join(env_name);

        if clean && out_dir.exists() {
            debug!(out_dir = %out_dir.display(), "clean build: removing build directory");
            std::fs::remove_dir_all(&out_dir)?;
        }
        std::fs::create_dir_all(&out_dir)?;

        let sources = discover_sources(project_dir)?;
        if sources.is_empty() {
            return Err(OrchestratorError::NoSources(
                project_dir.display().to_string(),
            ));
        }

        let mut flags = self.toolchain.base_flags.clone();
        flags.extend(env.build_flags.iter().cloned());
        let build_flags_hash = hash_flags(&flags);

        info!(
            platform = %self.platform,
            env = env_name,
            sources = sources.len(),
            "starting build"
        );

        // Decide per translation unit, submit what needs compiling
        let mut pending: Vec<(PathBuf, JobHandle)> = Vec::new();
        let mut objects: Vec<PathBuf> = Vec::new();
        let mut compiled_sources: Vec<PathBuf> = Vec::new();
        let mut skipped = 0usize;

        for (index, source) in sources.iter().enumerate() {
            let object = object_path(&out_dir, project_dir, source);
            objects.push(object.clone());

            if !deps.file_cache.needs_recompilation(source, &object) {
                if self.verbose {
                    debug!(source = %source.display(), "up to date, skipping");
                }
                skipped += 1;
                continue;
            }

            let job = CompileJob {
                job_id: format!("compile-{}-{}", env_name, index),
                compiler: self.toolchain.compiler.clone(),
                flags: flags.clone(),
                include_paths: self.toolchain.include_paths.clone(),
                source: source.clone(),
                object,
            };
            compiled_sources.push(source.clone());
            pending.push((source.clone(), deps.queue.submit(job)?));

            // Honor the per-request parallelism bound
            if let Some(limit) = jobs {
                if pending.len() >= limit.max(1) {
                    drain_jobs(&mut pending, deps.errors).await;
                }
            }
        }

        drain_jobs(&mut pending, deps.errors).await;

        if deps.errors.has_errors() {
            return Ok(BuildOutcome {
                success: false,
                firmware_path: None,
                firmware_hash: None,
                source_hash: None,
                build_flags_hash,
                compiled_units: compiled_sources.len(),
                skipped_units: skipped,
                message: format!("compilation failed: {}", deps.errors.format_summary()),
            });
        }

        // Link
        let elf_path = out_dir.join("firmware.elf");
        if let Err(message) = self.link(&objects, &elf_path, deps).await {
            deps.errors.add(
                BuildError::new(Severity::Fatal, Phase::Link, message.clone())
                    .with_file(elf_path.clone()),
            );
            return Ok(BuildOutcome {
                success: false,
                firmware_path: None,
                firmware_hash: None,
                source_hash: None,
                build_flags_hash,
                compiled_units: compiled_sources.len(),
                skipped_units: skipped,
                message,
            });
        }

        // Image conversion
        let firmware_path = match self.make_image(&elf_path, &out_dir, deps).await {
            Ok(path) => path,
            Err(message) => {
                deps.errors
                    .add(BuildError::new(Severity::Fatal, Phase::Image, message.clone()));
                return Ok(BuildOutcome {
                    success: false,
                    firmware_path: None,
                    firmware_hash: None,
                    source_hash: None,
                    build_flags_hash,
                    compiled_units: compiled_sources.len(),
                    skipped_units: skipped,
                    message,
                });
            }
        };

        // Record the compiled units so the next build can skip them
        if let Err(e) = deps.file_cache.update_batch(&compiled_sources) {
            warn!(error = %e, "failed to update file cache after build");
        }

        let source_hash = hash_file_set(&sources)?;
        let firmware_hash = hash_file(&firmware_path)?;

        info!(
            env = env_name,
            compiled = compiled_sources.len(),
            skipped,
            firmware = %firmware_path.display(),
            "build succeeded"
        );

        Ok(BuildOutcome {
            success: true,
            message: format!(
                "built {} ({} compiled, {} up to date)",
                firmware_path.display(),
                compiled_sources.len(),
                skipped
            ),
            firmware_path: Some(firmware_path),
            firmware_hash: Some(firmware_hash),
            source_hash: Some(source_hash),
            build_flags_hash,
            compiled_units: compiled_sources.len(),
            skipped_units: skipped,
        })
    }

    async fn link(
        &self,
        objects: &[PathBuf],
        elf_path: &Path,
        deps: &BuildDeps<'_>,
    ) -> Result<(), String> {
        let mut args: Vec<String> = self.toolchain.link_flags.clone();
        args.extend(objects.iter().map(|o| o.display().to_string()));
        args.push("-o".to_string());
        args.push(elf_path.display().to_string());

        let cmd = WatchdogCommand::new(&self.toolchain.linker)
            .args(args)
            .total_timeout(LINK_TOTAL_TIMEOUT)
            .idle_timeout(LINK_IDLE_TIMEOUT);

        let (_, result) = deps.runner.run(cmd).await;
        match result {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(format!(
                "link failed with exit code {}: {}",
                output.exit_code,
                output.stderr.trim()
            )),
            Err(SubprocessError::Timeout { bound, .. }) => {
                Err(format!("link timed out ({bound})"))
            }
            Err(e) => Err(format!("link failed: {e}")),
        }
    }

    async fn make_image(
        &self,
        elf_path: &Path,
        out_dir: &Path,
        deps: &BuildDeps<'_>,
    ) -> Result<PathBuf, String> {
        let Some(objcopy) = &self.toolchain.objcopy else {
            return Ok(elf_path.to_path_buf());
        };

        let image_path = out_dir.join(format!("firmware.{}", self.toolchain.image_ext));
        let format = match self.platform {
            Platform::AtmelAvr => "ihex",
            Platform::Espressif32 => "binary",
        };

        let cmd = WatchdogCommand::new(objcopy)
            .args([
                "-O".to_string(),
                format.to_string(),
                elf_path.display().to_string(),
                image_path.display().to_string(),
            ])
            .total_timeout(LINK_TOTAL_TIMEOUT)
            .idle_timeout(LINK_IDLE_TIMEOUT);

        let (_, result) = deps.runner.run(cmd).await;
        match result {
            Ok(output) if output.success() => Ok(image_path),
            Ok(output) => Err(format!(
                "image conversion failed with exit code {}: {}",
                output.exit_code,
                output.stderr.trim()
            )),
            Err(e) => Err(format!("image conversion failed: {e}")),
        }
    }
}

/// Await submitted jobs, collecting failures.
async fn drain_jobs(pending: &mut Vec<(PathBuf, JobHandle)>, errors: &ErrorCollector) {
    for (source, handle) in pending.drain(..) {
        match handle.wait().await {
            Ok(outcome) if outcome.ok => {}
            Ok(outcome) => {
                errors.add(
                    BuildError::new(
                        Severity::Error,
                        Phase::Compile,
                        format!("compilation of {} failed", source.display()),
                    )
                    .with_file(source)
                    .with_stdout(outcome.stdout)
                    .with_stderr(outcome.stderr),
                );
            }
            Err(e) => {
                errors.add(
                    BuildError::new(
                        Severity::Fatal,
                        Phase::Compile,
                        format!("compile job lost: {e}"),
                    )
                    .with_file(source),
                );
            }
        }
    }
}

/// Source extensions that become translation units.
const SOURCE_EXTS: [&str; 4] = ["c", "cc", "cpp", "ino"];

/// Find compilable sources: the project root (`.ino` sketches) plus the
/// `src/` tree, recursively. The `.fbuild` output directory is skipped.
fn discover_sources(project_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut sources = Vec::new();

    for entry in std::fs::read_dir(project_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && is_source(&path) {
            sources.push(path);
        }
    }

    let src_dir = project_dir.join("src");
    if src_dir.is_dir() {
        walk_sources(&src_dir, &mut sources)?;
    }

    sources.sort();
    Ok(sources)
}

fn walk_sources(dir: &Path, sources: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_sources(&path, sources)?;
        } else if is_source(&path) {
            sources.push(path);
        }
    }
    Ok(())
}

fn is_source(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| SOURCE_EXTS.contains(&ext))
        .unwrap_or(false)
}

/// Object path for a source, mangled so same-named files in different
/// directories don't collide.
fn object_path(out_dir: &Path, project_dir: &Path, source: &Path) -> PathBuf {
    let relative = source.strip_prefix(project_dir).unwrap_or(source);
    let mangled = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("_");
    out_dir.join(format!("{mangled}.o"))
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
