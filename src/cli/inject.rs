//! Inject command implementation.
//!
//! Stages the VFS source, serializes the config records, and runs the batch
//! injection. When the target is a SMOL stub the payloads go into the
//! stub's inner binary, which is then recompressed and repacked;
//! `--skip-repack` injects into the stub itself instead.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;

use binject::config::BuildConfig;
use binject::{BatchPayloads, Error, Result, VfsConfig};
use binject_pack::vfs::{self, VfsSource};

/// Inject SEA and VFS payloads into an executable.
#[derive(Args, Debug)]
pub struct InjectCmd {
    /// Target executable.
    #[arg(short = 'e', long)]
    pub executable: PathBuf,

    /// Output path.
    #[arg(short = 'o', long)]
    pub output: PathBuf,

    /// SEA blob to embed.
    #[arg(long)]
    pub sea: Option<PathBuf>,

    /// VFS source (directory, .tar, or .tar.gz); shorthand for on-disk mode.
    #[arg(long)]
    pub vfs: Option<PathBuf>,

    /// VFS source, extracted to a temp directory at startup.
    #[arg(long, conflicts_with = "vfs")]
    pub vfs_on_disk: Option<PathBuf>,

    /// VFS source, kept in memory at startup.
    #[arg(long, conflicts_with_all = ["vfs", "vfs_on_disk"])]
    pub vfs_in_memory: Option<PathBuf>,

    /// Emit an empty VFS section for compat-mode startup.
    #[arg(long, conflicts_with_all = ["vfs", "vfs_on_disk", "vfs_in_memory"])]
    pub vfs_compat: bool,

    /// Inject into the stub directly instead of repacking its inner binary.
    #[arg(long)]
    pub skip_repack: bool,

    /// Build-config JSON (CLI VFS flags take precedence over it).
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
}

/// The VFS request after flag/config precedence is applied.
struct VfsRequest {
    mode: &'static str,
    source: Option<PathBuf>,
}

impl InjectCmd {
    /// Execute the inject command.
    pub fn run(&self) -> Result<()> {
        let config = match &self.config {
            Some(path) => BuildConfig::load(path)?,
            None => BuildConfig::default(),
        };

        let vfs_request = self.vfs_request(&config)?;
        if self.sea.is_none() && vfs_request.is_none() {
            return Err(Error::invalid_args(
                "nothing to inject: pass --sea and/or a --vfs option",
            ));
        }
        if self.sea.is_none() && vfs_request.is_some() {
            return Err(Error::invalid_args(
                "a VFS payload requires --sea: the runtime cannot reach a VFS without the SEA blob",
            ));
        }

        let sea_data = match &self.sea {
            Some(path) => Some(fs::read(path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    Error::invalid_args(format!("SEA blob {} not found", path.display()))
                }
                _ => Error::Io(e),
            })?),
            None => None,
        };

        // Stage the VFS archive; staged temp files are ours to unlink.
        let mut staged: Option<PathBuf> = None;
        let result = self.inject_with_vfs(&config, &vfs_request, sea_data.as_deref(), &mut staged);
        if let Some(path) = staged {
            let _ = fs::remove_file(path);
        }
        result
    }

    fn inject_with_vfs(
        &self,
        config: &BuildConfig,
        vfs_request: &Option<VfsRequest>,
        sea_data: Option<&[u8]>,
        staged: &mut Option<PathBuf>,
    ) -> Result<()> {
        let mut vfs_data: Option<Vec<u8>> = None;
        let mut vfs_compat = false;
        let mut vfs_config_bytes: Option<Vec<u8>> = None;

        if let Some(request) = vfs_request {
            let source_text = request
                .source
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned());

            if request.mode == "compat" {
                vfs_compat = true;
            } else {
                let source = request.source.as_ref().ok_or_else(|| {
                    Error::invalid_args(format!("vfs mode {} needs a source path", request.mode))
                })?;
                vfs_data = Some(stage_vfs_source(source, staged)?);
            }

            let record = VfsConfig {
                mode: request.mode.to_string(),
                source: source_text,
                prefix: config.vfs.as_ref().and_then(|v| v.prefix.clone()),
            };
            vfs_config_bytes = Some(binject::serialize_svfg(&record)?);
        }

        let payloads = BatchPayloads {
            sea: sea_data,
            vfs: vfs_data.as_deref(),
            vfs_compat,
            vfs_config: vfs_config_bytes.as_deref(),
        };

        if !self.skip_repack && binject::is_smol_stub(&self.executable)? {
            self.repack_stub(&payloads)
        } else {
            binject::inject_batch(&self.executable, &self.output, &payloads)?;
            println!("Injected payloads into {}", self.output.display());
            Ok(())
        }
    }

    /// Extract the stub's inner binary, inject into it, recompress, repack.
    fn repack_stub(&self, payloads: &BatchPayloads) -> Result<()> {
        tracing::info!(stub = %self.executable.display(), "target is a SMOL stub, repacking");

        let work = tempfile::tempdir().map_err(Error::Io)?;
        let inner = work.path().join("inner");
        binject::smol_extract_binary(&self.executable, &inner)?;

        let injected = work.path().join("inner-injected");
        binject::inject_batch(&inner, &injected, payloads)?;

        let old_section = binject::read_pressed_section(&self.executable)?;
        let new_inner = fs::read(&injected)?;
        let new_section = binject::rebuild_stub_section(&old_section, &new_inner)?;

        binject::smol_repack(&self.executable, &new_section, &self.output)?;
        println!(
            "Injected payloads into the stub's inner binary and repacked {}",
            self.output.display()
        );
        Ok(())
    }

    /// Apply CLI-over-config precedence to the VFS settings.
    fn vfs_request(&self, config: &BuildConfig) -> Result<Option<VfsRequest>> {
        let flagged = [
            self.vfs.as_ref().map(|p| ("on-disk", p)),
            self.vfs_on_disk.as_ref().map(|p| ("on-disk", p)),
            self.vfs_in_memory.as_ref().map(|p| ("in-memory", p)),
        ]
        .into_iter()
        .flatten()
        .next();

        if let Some((mode, source)) = flagged {
            return Ok(Some(VfsRequest {
                mode,
                source: Some(source.clone()),
            }));
        }
        if self.vfs_compat {
            return Ok(Some(VfsRequest {
                mode: "compat",
                source: None,
            }));
        }

        let Some(vfs) = &config.vfs else {
            return Ok(None);
        };
        let mode = match vfs.mode.as_str() {
            "on-disk" => "on-disk",
            "in-memory" => "in-memory",
            "compat" => "compat",
            other => {
                return Err(Error::invalid_args(format!(
                    "config vfs mode {other} is not one of on-disk, in-memory, compat"
                )))
            }
        };
        let source = vfs.source.as_ref().map(|s| {
            self.config
                .as_ref()
                .map(|c| vfs::resolve_relative(c, s))
                .unwrap_or_else(|| PathBuf::from(s))
        });
        Ok(Some(VfsRequest { mode, source }))
    }
}

/// Stage a VFS source into archive bytes, tracking any temp file created.
fn stage_vfs_source(source: &Path, staged: &mut Option<PathBuf>) -> Result<Vec<u8>> {
    match vfs::detect_source_type(source) {
        VfsSource::Missing => Err(Error::invalid_args(format!(
            "vfs source {} not found",
            source.display()
        ))),
        VfsSource::Invalid => Err(Error::invalid_args(format!(
            "vfs source {} is neither a directory nor a tarball",
            source.display()
        ))),
        VfsSource::Dir => {
            let archive = vfs::create_archive_from_dir(source)?;
            let data = fs::read(&archive)?;
            *staged = Some(archive);
            Ok(data)
        }
        VfsSource::Tar => {
            let archive = vfs::compress_tar(source)?;
            let data = fs::read(&archive)?;
            *staged = Some(archive);
            Ok(data)
        }
        VfsSource::TarGz => Ok(fs::read(source)?),
    }
}
