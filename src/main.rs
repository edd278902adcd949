//! miniproto - inspect protobuf payloads against a descriptor set
//!
//! Schemas are loaded from a `FileDescriptorSet` as written by
//! `protoc --descriptor_set_out=FILE --include_imports`.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

use miniproto::json::{JsonEncodeOptions, encode as encode_json};
use miniproto::{Arena, DecodeOptions, DefPool, DynamicMessage, MessageDef};

/// Decode and describe protobuf messages using runtime schemas
#[derive(Parser, Debug)]
#[command(name = "miniproto")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a binary message and print it
    Decode {
        #[command(flatten)]
        schema: Schema,

        /// Print proto JSON instead of the debug form
        #[arg(long)]
        json: bool,

        /// Include fields that hold their default value (with --json)
        #[arg(long, requires = "json")]
        emit_defaults: bool,

        /// Binary input; stdin when omitted or "-"
        input: Option<PathBuf>,
    },
    /// Print the mini-descriptor of a message type
    MiniDescriptor {
        #[command(flatten)]
        schema: Schema,
    },
}

#[derive(Args, Debug)]
struct Schema {
    /// Serialized FileDescriptorSet
    #[arg(long, env = "MINIPROTO_DESCRIPTOR_SET")]
    descriptor_set: PathBuf,

    /// Fully qualified message name, e.g. `my.pkg.Request`
    #[arg(long = "type")]
    type_name: String,
}

impl Schema {
    fn load(&self) -> Result<DefPool> {
        let bytes = fs::read(&self.descriptor_set)
            .with_context(|| format!("reading {}", self.descriptor_set.display()))?;
        let mut pool = DefPool::new()?;
        pool.add_serialized_file_set(&bytes)
            .with_context(|| format!("loading {}", self.descriptor_set.display()))?;
        info!(files = pool.file_count(), "loaded descriptor set");
        Ok(pool)
    }

    fn message<'p>(&self, pool: &'p DefPool) -> Result<MessageDef<'p>> {
        let name = self.type_name.trim_start_matches('.');
        pool.find_message_by_name(name)
            .ok_or_else(|| anyhow!("message type {name} not found in {}", self.descriptor_set.display()))
    }
}

fn read_input(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(p) if p != Path::new("-") => fs::read(p).with_context(|| format!("reading {}", p.display())),
        _ => {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf).context("reading stdin")?;
            Ok(buf)
        }
    }
}

fn decode(schema: &Schema, json: bool, emit_defaults: bool, input: Option<&Path>) -> Result<()> {
    let pool = schema.load()?;
    let def = schema.message(&pool)?;
    let bytes = read_input(input)?;
    debug!(len = bytes.len(), message = def.full_name(), "decoding");

    let arena = Arena::default();
    let mut msg = DynamicMessage::new(def, &arena)?;
    msg.decode(&bytes, DecodeOptions::new())
        .with_context(|| format!("decoding {}", def.full_name()))?;

    let mut out = io::stdout().lock();
    if json {
        let mut options = JsonEncodeOptions::new();
        if emit_defaults {
            options = options.with_emit_defaults();
        }
        writeln!(out, "{}", encode_json(msg.message(), def, options)?)?;
    } else {
        writeln!(out, "{:#?}", msg.as_ref())?;
    }
    Ok(())
}

fn mini_descriptor(schema: &Schema) -> Result<()> {
    let pool = schema.load()?;
    let def = schema.message(&pool)?;
    writeln!(io::stdout().lock(), "{}", def.mini_descriptor())?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Decode { schema, json, emit_defaults, input } => {
            decode(schema, *json, *emit_defaults, input.as_deref())
        }
        Command::MiniDescriptor { schema } => mini_descriptor(schema),
    }
}
