// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use tpm2::{TpmAlgId, TpmSu};
use tpm2d::{
    read_blob_hex, AttributeOverrides, BlobSink, Config, Executor, Hierarchy, KeyRole, TpmContext,
};
use tpm_types::{bin_to_hex, hex_to_bin, KeyBlobs, PcrSelection};

/// TPM 2.0 session, key, NV and attestation tool
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, env = "TPM2D_CONFIG")]
    config: Option<PathBuf>,

    /// TPM channel, e.g. `device:/dev/tpmrm0` or `mssim:127.0.0.1:2321`
    #[arg(long, env = "TPM2D_TCTI")]
    tcti: Option<String>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Power-cycle a simulator (if requested) and send TPM2_Startup
    Startup(StartupArgs),
    /// Run the full TPM self test
    Selftest,
    /// Get random bytes from the TPM
    Random(RandomArgs),
    /// Read one PCR
    PcrRead(PcrReadArgs),
    /// Extend one PCR with a digest
    PcrExtend(PcrExtendArgs),
    /// Quote PCRs with a signing key
    Quote(QuoteArgs),
    /// Create a primary key
    CreatePrimary(CreatePrimaryArgs),
    /// Create a child key under a loaded parent
    Create(CreateArgs),
    /// Load a child key from blob files
    Load(LoadArgs),
    /// Persist or evict an object
    Evict(EvictArgs),
    /// Define an NV index
    NvDefine(NvDefineArgs),
    /// Remove an NV index
    NvUndefine(NvUndefineArgs),
    /// Write an NV index
    NvWrite(NvWriteArgs),
    /// Read an NV index
    NvRead(NvReadArgs),
    /// Clear the TPM with lockout authorization
    Clear(ClearArgs),
}

fn parse_hex(s: &str) -> std::result::Result<u32, String> {
    let digits = s.trim_start_matches("0x");
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid hex number {s:?}: {e}"))
}

#[derive(Args)]
struct StartupArgs {
    /// Send power-off/power-on/NV-on first (simulator only)
    #[arg(long)]
    powerup: bool,
    /// Resume saved state instead of a clear startup
    #[arg(long)]
    state: bool,
}

#[derive(Args)]
struct RandomArgs {
    /// Number of bytes
    #[arg(short = 'n', long, default_value_t = 32)]
    bytes: usize,
}

#[derive(Args)]
struct PcrReadArgs {
    pcr: u32,
    /// Bank, e.g. sha256
    #[arg(long, default_value = "sha256")]
    bank: String,
}

#[derive(Args)]
struct PcrExtendArgs {
    pcr: u32,
    /// Digest value (hex), zero-padded to the bank's digest size
    data: String,
    #[arg(long, default_value = "sha256")]
    bank: String,
}

#[derive(Args)]
struct QuoteArgs {
    /// Signing key handle
    #[arg(long, value_parser = parse_hex)]
    key: u32,
    #[arg(long)]
    key_password: Option<String>,
    /// PCR selection, `bank:0,1,2` or `0,1,2`
    #[arg(long, default_value = "sha256:0,1,2,3,4,5,6,7")]
    pcrs: PcrSelection,
    /// Qualifying data (hex)
    #[arg(long)]
    nonce: Option<String>,
}

#[derive(Args)]
struct CreatePrimaryArgs {
    #[arg(long, default_value = "owner")]
    hierarchy: Hierarchy,
    #[arg(long, default_value = "storage-r")]
    role: KeyRole,
    #[arg(long)]
    hierarchy_password: Option<String>,
    #[arg(long)]
    key_password: Option<String>,
    /// Write the public blob here
    #[arg(long)]
    public: Option<PathBuf>,
}

#[derive(Args)]
struct CreateArgs {
    #[arg(long, value_parser = parse_hex)]
    parent: u32,
    #[arg(long)]
    role: KeyRole,
    /// TPMA_OBJECT bits to set on top of fixedTPM|fixedParent
    #[arg(long, value_parser = parse_hex, default_value = "0")]
    set_attributes: u32,
    /// TPMA_OBJECT bits to clear
    #[arg(long, value_parser = parse_hex, default_value = "0")]
    clear_attributes: u32,
    #[arg(long)]
    parent_password: Option<String>,
    #[arg(long)]
    key_password: Option<String>,
    #[arg(long)]
    public: Option<PathBuf>,
    #[arg(long)]
    private: Option<PathBuf>,
}

#[derive(Args)]
struct LoadArgs {
    #[arg(long, value_parser = parse_hex)]
    parent: u32,
    #[arg(long)]
    parent_password: Option<String>,
    #[arg(long)]
    public: PathBuf,
    #[arg(long)]
    private: PathBuf,
}

#[derive(Args)]
struct EvictArgs {
    #[arg(long, default_value = "owner")]
    hierarchy: Hierarchy,
    #[arg(long)]
    hierarchy_password: Option<String>,
    #[arg(long, value_parser = parse_hex)]
    object: u32,
    #[arg(long, value_parser = parse_hex)]
    persistent: u32,
}

#[derive(Args)]
struct NvDefineArgs {
    #[arg(value_parser = parse_hex)]
    index: u32,
    #[arg(long)]
    size: u16,
    #[arg(long, default_value = "owner")]
    hierarchy: Hierarchy,
    #[arg(long)]
    hierarchy_password: Option<String>,
    #[arg(long)]
    index_password: Option<String>,
}

#[derive(Args)]
struct NvUndefineArgs {
    #[arg(value_parser = parse_hex)]
    index: u32,
    #[arg(long, default_value = "owner")]
    hierarchy: Hierarchy,
    #[arg(long)]
    hierarchy_password: Option<String>,
}

#[derive(Args)]
struct NvWriteArgs {
    #[arg(value_parser = parse_hex)]
    index: u32,
    /// Data (hex)
    data: String,
    #[arg(long)]
    index_password: Option<String>,
}

#[derive(Args)]
struct NvReadArgs {
    #[arg(value_parser = parse_hex)]
    index: u32,
    #[arg(long)]
    index_password: Option<String>,
    /// Largest acceptable size
    #[arg(long, default_value_t = 4096)]
    capacity: usize,
}

#[derive(Args)]
struct ClearArgs {
    #[arg(long)]
    lockout_password: Option<String>,
}

fn bank(name: &str) -> Result<TpmAlgId> {
    TpmAlgId::from_hash_name(name).with_context(|| format!("unknown PCR bank {name}"))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(tpm: &mut Executor, command: Commands) -> Result<()> {
    match command {
        Commands::Startup(args) => {
            if args.powerup {
                tpm.powerup().context("failed to power up the TPM")?;
            }
            let su = if args.state { TpmSu::State } else { TpmSu::Clear };
            tpm.startup(su)?;
        }
        Commands::Selftest => tpm.selftest()?,
        Commands::Random(args) => {
            let bytes = tpm.get_random(args.bytes)?;
            print_json(&json!({ "random": bin_to_hex(&bytes) }))?;
        }
        Commands::PcrRead(args) => {
            print_json(&tpm.pcr_read(args.pcr, bank(&args.bank)?)?)?;
        }
        Commands::PcrExtend(args) => {
            let data = hex_to_bin(&args.data)?;
            tpm.pcr_extend(args.pcr, bank(&args.bank)?, &data)?;
        }
        Commands::Quote(args) => {
            let configured = tpm.config().hash_alg();
            if bank(&args.pcrs.bank)? != configured {
                bail!("quotes use the configured {} bank", configured.label());
            }
            let report = tpm.quote(
                &args.pcrs.pcrs,
                args.key,
                args.key_password.as_deref(),
                args.nonce.as_deref(),
            )?;
            print_json(&report)?;
        }
        Commands::CreatePrimary(args) => {
            let sink = BlobSink {
                public: args.public,
                private: None,
            };
            let (handle, public) = tpm.create_primary(
                args.hierarchy,
                args.role,
                args.hierarchy_password.as_deref(),
                args.key_password.as_deref(),
                &sink,
            )?;
            print_json(&json!({
                "handle": format!("0x{handle:08x}"),
                "public": bin_to_hex(&public.public_area),
            }))?;
        }
        Commands::Create(args) => {
            let sink = BlobSink {
                public: args.public.clone(),
                private: args.private.clone(),
            };
            let overrides = AttributeOverrides {
                set: args.set_attributes,
                clear: args.clear_attributes,
            };
            let pair = tpm.create_child(
                args.parent,
                args.role,
                overrides,
                args.parent_password.as_deref(),
                args.key_password.as_deref(),
                &sink,
            )?;
            let blobs = match (&args.public, &args.private) {
                (Some(public), Some(private)) => KeyBlobs {
                    public: read_blob_hex(public)?,
                    private: Some(read_blob_hex(private)?),
                },
                _ => KeyBlobs {
                    public: bin_to_hex(&pair.public.public_area),
                    private: Some(bin_to_hex(pair.private.as_slice())),
                },
            };
            print_json(&blobs)?;
        }
        Commands::Load(args) => {
            let handle = tpm.load_from_files(
                args.parent,
                args.parent_password.as_deref(),
                &args.private,
                &args.public,
            )?;
            print_json(&json!({ "handle": format!("0x{handle:08x}") }))?;
        }
        Commands::Evict(args) => tpm.evict_control(
            args.hierarchy,
            args.hierarchy_password.as_deref(),
            args.object,
            args.persistent,
        )?,
        Commands::NvDefine(args) => tpm.nv_define_space(
            args.hierarchy,
            args.index,
            args.size,
            args.hierarchy_password.as_deref(),
            args.index_password.as_deref(),
        )?,
        Commands::NvUndefine(args) => {
            tpm.nv_undefine_space(args.hierarchy, args.index, args.hierarchy_password.as_deref())?
        }
        Commands::NvWrite(args) => {
            let data = hex_to_bin(&args.data)?;
            tpm.nv_write(args.index, args.index_password.as_deref(), &data)?;
        }
        Commands::NvRead(args) => {
            let data = tpm.nv_read(args.index, args.index_password.as_deref(), args.capacity)?;
            print_json(&json!({ "data": bin_to_hex(&data) }))?;
        }
        Commands::Clear(args) => tpm.clear(args.lockout_password.as_deref())?,
    }
    Ok(())
}

fn main() -> Result<()> {
    {
        use tracing_subscriber::{fmt, EnvFilter};
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    }

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if cli.tcti.is_some() {
        config.tcti = cli.tcti;
    }

    let mut ctx = TpmContext::new(config);
    ctx.open().context("failed to create TPM device context")?;
    let result = run(ctx.device()?, cli.command);
    ctx.destroy().context("failed to destroy TPM device context")?;
    result
}
